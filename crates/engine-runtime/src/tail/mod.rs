pub mod messages;
pub mod poller;

pub use messages::{PollerMsg, TailRegistration, TailReport};
pub use poller::TailPoller;
