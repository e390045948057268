pub mod output;
pub mod scheduler;
pub mod sync;

pub use output::{ChannelOutput, ConsoleOutput, GpioOutput, OutputBank};
pub use scheduler::{PlayOutcome, PlaybackError, PlaybackState, Scheduler};
pub use sync::{PlayMode, StartTicket, SyncStart};
