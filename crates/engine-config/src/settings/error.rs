use thiserror::Error;

/// Errors raised when loading or checking engine configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`EngineConfig`](super::EngineConfig).
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// One or more values are out of range or contradict each other.
    #[error("Configuration validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
}
