use model::core::identifiers::TaskId;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single transport call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport call timed out")]
    Timeout,

    #[error("Transport unreachable: {0}")]
    Unreachable(String),

    /// The platform demands a cool-down before any further call.
    #[error("Throttled by the platform for {}s", .wait.as_secs())]
    Throttled { wait: Duration },

    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Invalid reference, missing permission, rejected content.
    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode or decode task state: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already exists: {0}")]
    AlreadyExists(TaskId),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Failed to load task: {0}")]
    Load(#[from] StoreError),

    #[error("Task not found: {0}")]
    NotFound(TaskId),
}
