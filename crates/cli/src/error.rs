use crate::shutdown::ExitCode;
use engine_config::settings::error::SettingsError;
use engine_runtime::error::{EngineError, ResponseCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("Failed to load the configuration file: {0}")]
    Config(#[from] SettingsError),

    #[error("Failed to open state store at {path}: {reason}")]
    StateStore { path: String, reason: String },

    #[error("Failed to load fixture {path}: {reason}")]
    Fixture { path: String, reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Task {id} failed: {reason}")]
    TaskFailed { id: String, reason: String },

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Engine(e) => ExitCode::from(e.code()),
            CliError::Config(_) | CliError::InvalidArgs(_) => ExitCode::ValidationFailed,
            CliError::ShutdownRequested => ExitCode::ShutdownRequested,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ResponseCode> for ExitCode {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::Success => ExitCode::Success,
            ResponseCode::NotFound => ExitCode::NotFound,
            ResponseCode::InvalidRange => ExitCode::InvalidRange,
            ResponseCode::ConcurrencyLimit => ExitCode::ConcurrencyLimit,
            ResponseCode::ValidationFailed => ExitCode::ValidationFailed,
            ResponseCode::Internal => ExitCode::GeneralError,
        }
    }
}
