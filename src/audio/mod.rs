pub mod decode;
pub mod spectrum;
