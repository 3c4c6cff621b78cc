pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod progress;
pub mod rate;
pub mod retry;
pub mod state;
pub mod transform;
pub mod transport;
