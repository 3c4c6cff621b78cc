use crate::settings::{error::SettingsError, transform::TransformProfiles, validator::SettingsValidator};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tracing::info;

pub mod duration;
pub mod error;
pub mod transform;
pub mod validator;

/// Sliding-window limits shared by every outbound transport call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    #[serde(with = "duration::millis")]
    pub window: Duration,
    pub max_calls: usize,
    /// Mandated waits at or above this are logged as severe.
    #[serde(with = "duration::millis")]
    pub severe_wait: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_calls: 600,
            severe_wait: Duration::from_secs(1000),
        }
    }
}

/// Range fetching, boundary probing and adaptive batch sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub initial_batch: usize,
    pub min_batch: usize,
    pub max_batch: usize,
    pub batch_step: usize,
    /// Number of batches between two size adjustments.
    pub adjust_every: usize,
    #[serde(with = "duration::millis")]
    pub fast_threshold: Duration,
    #[serde(with = "duration::millis")]
    pub slow_threshold: Duration,
    /// How far past a batch edge a cut media group is followed.
    pub probe_limit: usize,
    pub probe_step: usize,
    pub max_ids_per_call: usize,
    /// Spans at least this wide are bisected when mostly empty.
    pub bisect_span: usize,
    pub bisect_chunk: usize,
    /// Missing-id share above which a wide span counts as a suspicious gap.
    pub gap_ratio: f64,
    #[serde(with = "duration::millis")]
    pub fetch_timeout: Duration,
    /// How many recent messages define an open-ended range.
    pub open_range_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            initial_batch: 500,
            min_batch: 200,
            max_batch: 1000,
            batch_step: 100,
            adjust_every: 5,
            fast_threshold: Duration::from_secs(2),
            slow_threshold: Duration::from_secs(5),
            probe_limit: 50,
            probe_step: 10,
            max_ids_per_call: 200,
            bisect_span: 200,
            bisect_chunk: 50,
            gap_ratio: 0.5,
            fetch_timeout: Duration::from_secs(30),
            open_range_limit: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: usize,
    #[serde(with = "duration::millis")]
    pub retry_delay: Duration,
    #[serde(with = "duration::millis")]
    pub max_delay: Duration,
    #[serde(with = "duration::millis")]
    pub send_timeout: Duration,
    pub caption_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(10),
            send_timeout: Duration::from_secs(60),
            caption_limit: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    pub max_tasks_per_owner: usize,
    /// Minimum wall-clock time between two progress writes of one task.
    #[serde(with = "duration::millis")]
    pub checkpoint_interval: Duration,
    #[serde(with = "duration::millis")]
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 20,
            max_tasks_per_owner: 20,
            checkpoint_interval: Duration::from_secs(10),
            task_timeout: Duration::from_secs(7200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    #[serde(with = "duration::millis")]
    pub poll_interval: Duration,
    pub sources_per_tick: usize,
    pub recent_limit: usize,
    pub recency_capacity: usize,
    /// Consecutive listing failures before a source is backed off hard.
    pub failure_threshold: u32,
    #[serde(with = "duration::millis")]
    pub max_backoff: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            sources_per_tick: 5,
            recent_limit: 100,
            recency_capacity: 1000,
            failure_threshold: 5,
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Complete engine configuration. Every field has a default, so `{}` is a
/// valid configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rate: RateConfig,
    pub fetch: FetchConfig,
    pub dispatch: DispatchConfig,
    pub scheduler: SchedulerConfig,
    pub tail: TailConfig,
    pub transform: TransformProfiles,
}

impl EngineConfig {
    /// Reads a JSON configuration file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_json(&source)?;
        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    pub fn from_json(source: &str) -> Result<Self, SettingsError> {
        let config: EngineConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        SettingsValidator::new(self).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = EngineConfig::from_json("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.scheduler.checkpoint_interval, Duration::from_secs(10));
        assert_eq!(cfg.tail.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn durations_are_read_as_millis() {
        let cfg =
            EngineConfig::from_json(r#"{"rate": {"window": 1000, "max_calls": 5}}"#).unwrap();
        assert_eq!(cfg.rate.window, Duration::from_secs(1));
        assert_eq!(cfg.rate.max_calls, 5);
        assert_eq!(cfg.rate.severe_wait, Duration::from_secs(1000));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler": {{"max_concurrent_tasks": 2}}}}"#).unwrap();

        let cfg = EngineConfig::load(file.path()).unwrap();
        assert_eq!(cfg.scheduler.max_concurrent_tasks, 2);
        assert_eq!(cfg.scheduler.max_tasks_per_owner, 20);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json(r#"{"fetch": {"min_batch": 900, "max_batch": 100}}"#)
            .unwrap_err();
        assert!(matches!(err, SettingsError::ValidationFailed(_)));
    }
}
