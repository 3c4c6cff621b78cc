pub mod actor;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod tail;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Engine, NewTask};
