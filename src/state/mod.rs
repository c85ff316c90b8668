pub mod channel;
pub mod evaluator;

pub use channel::{AcceptedPayment, DaemonConfig, DaemonState};
pub use evaluator::ChannelStatus;
