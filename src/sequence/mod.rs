pub mod codec;

pub use codec::{bytes_per_frame, Frame, FrameSequence, SequenceError};
