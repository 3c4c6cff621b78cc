use crate::scheduler::AdmitError;
use engine_config::settings::error::SettingsError;
use engine_core::error::{ProgressError, StoreError, TransportError};
use model::{core::identifiers::TaskId, task::status::TaskStatus};
use thiserror::Error;

/// Outcome class of an engine command, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    NotFound,
    InvalidRange,
    ConcurrencyLimit,
    ValidationFailed,
    Internal,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Success => "success",
            ResponseCode::NotFound => "not_found",
            ResponseCode::InvalidRange => "invalid_range",
            ResponseCode::ConcurrencyLimit => "concurrency_limit",
            ResponseCode::ValidationFailed => "validation_failed",
            ResponseCode::Internal => "internal",
        }
    }
}

/// Top-level errors for the replication engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(AdmitError),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The command does not apply to the task in its current state.
    #[error("Task {id} is {status}; cannot {action}")]
    InvalidState {
        id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),
}

impl EngineError {
    pub fn code(&self) -> ResponseCode {
        match self {
            EngineError::NotFound(_) => ResponseCode::NotFound,
            EngineError::InvalidRange(_) => ResponseCode::InvalidRange,
            EngineError::ConcurrencyLimit(_) => ResponseCode::ConcurrencyLimit,
            EngineError::ValidationFailed(_)
            | EngineError::InvalidState { .. }
            | EngineError::Settings(_) => ResponseCode::ValidationFailed,
            EngineError::ShuttingDown
            | EngineError::Store(_)
            | EngineError::Transport(_)
            | EngineError::Actor(_) => ResponseCode::Internal,
        }
    }
}

impl From<AdmitError> for EngineError {
    fn from(err: AdmitError) -> Self {
        match err {
            AdmitError::ShuttingDown => EngineError::ShuttingDown,
            AdmitError::AlreadyActive(id) => {
                EngineError::ValidationFailed(format!("task {id} is already running"))
            }
            other => EngineError::ConcurrencyLimit(other),
        }
    }
}

impl From<ProgressError> for EngineError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => EngineError::NotFound(id),
            ProgressError::Load(e) => EngineError::Store(e),
        }
    }
}

/// Common error type for all actors in the engine.
#[derive(Debug, Error)]
pub enum ActorError {
    #[error("Mailbox closed")]
    MailboxClosed,

    #[error("Actor internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_and_lookups_map_to_distinct_codes() {
        let limit: EngineError = AdmitError::GlobalLimit { limit: 20 }.into();
        assert_eq!(limit.code(), ResponseCode::ConcurrencyLimit);
        assert_eq!(
            EngineError::NotFound("task-x".into()).code(),
            ResponseCode::NotFound
        );
        assert_eq!(
            EngineError::InvalidRange("end before start".into()).code(),
            ResponseCode::InvalidRange
        );
    }

    #[test]
    fn shutdown_refusal_is_internal() {
        let err: EngineError = AdmitError::ShuttingDown.into();
        assert!(matches!(err, EngineError::ShuttingDown));
        assert_eq!(err.code(), ResponseCode::Internal);
    }
}
