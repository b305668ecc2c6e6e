pub mod backoff;
pub mod channel;
pub mod collector;
pub mod ofi;
pub mod supervisor;
pub mod validator;
pub mod writer;

pub use channel::{bounded, ChannelError, ChannelReceiver, ChannelSender};
pub use collector::{Collector, CollectorStats, TickProcessor};
pub use ofi::OfiCalculator;
pub use supervisor::{RunReport, StopCause, Supervisor, TaskOutcome};
pub use validator::TickValidator;
pub use writer::{BatchWriter, RetryPolicy, WriterStats};
