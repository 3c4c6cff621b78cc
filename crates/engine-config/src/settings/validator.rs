use crate::settings::{EngineConfig, error::SettingsError};
use tracing::{debug, warn};

/// Checks an [`EngineConfig`] for values the engine cannot run with.
/// All problems are collected before failing.
pub struct SettingsValidator<'a> {
    config: &'a EngineConfig,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_rate(&mut errors);
        self.validate_fetch(&mut errors);
        self.validate_dispatch(&mut errors);
        self.validate_scheduler(&mut errors);
        self.validate_tail(&mut errors);

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        debug!("Engine configuration validated");
        Ok(())
    }

    fn validate_rate(&self, errors: &mut Vec<String>) {
        let rate = &self.config.rate;
        if rate.window.is_zero() {
            errors.push("rate.window must be greater than zero".to_string());
        }
        if rate.max_calls == 0 {
            errors.push("rate.max_calls must be greater than zero".to_string());
        }
    }

    fn validate_fetch(&self, errors: &mut Vec<String>) {
        let fetch = &self.config.fetch;
        if fetch.min_batch == 0 || fetch.max_ids_per_call == 0 || fetch.bisect_chunk == 0 {
            errors.push(
                "fetch.min_batch, fetch.max_ids_per_call and fetch.bisect_chunk must be positive"
                    .to_string(),
            );
        }
        if fetch.min_batch > fetch.max_batch {
            errors.push(format!(
                "fetch.min_batch ({}) exceeds fetch.max_batch ({})",
                fetch.min_batch, fetch.max_batch
            ));
        }
        if fetch.initial_batch < fetch.min_batch || fetch.initial_batch > fetch.max_batch {
            errors.push(format!(
                "fetch.initial_batch ({}) must lie within [{}, {}]",
                fetch.initial_batch, fetch.min_batch, fetch.max_batch
            ));
        }
        if fetch.fast_threshold >= fetch.slow_threshold {
            errors.push("fetch.fast_threshold must be below fetch.slow_threshold".to_string());
        }
        if fetch.adjust_every == 0 || fetch.probe_step == 0 {
            errors.push("fetch.adjust_every and fetch.probe_step must be positive".to_string());
        }
        if fetch.bisect_chunk > fetch.bisect_span {
            errors.push("fetch.bisect_chunk must not exceed fetch.bisect_span".to_string());
        }
        if !(0.0..=1.0).contains(&fetch.gap_ratio) {
            errors.push("fetch.gap_ratio must lie within [0, 1]".to_string());
        }
        if fetch.max_batch > 10_000 {
            warn!(
                max_batch = fetch.max_batch,
                "Very large batch ceiling, a slow transform stage may stall checkpoints"
            );
        }
    }

    fn validate_dispatch(&self, errors: &mut Vec<String>) {
        if self.config.dispatch.max_attempts == 0 {
            errors.push("dispatch.max_attempts must be at least 1".to_string());
        }
        if self.config.dispatch.caption_limit == 0 {
            errors.push("dispatch.caption_limit must be positive".to_string());
        }
    }

    fn validate_scheduler(&self, errors: &mut Vec<String>) {
        let sched = &self.config.scheduler;
        if sched.max_concurrent_tasks == 0 || sched.max_tasks_per_owner == 0 {
            errors.push("scheduler concurrency limits must be positive".to_string());
        }
        if sched.task_timeout.is_zero() {
            errors.push("scheduler.task_timeout must be greater than zero".to_string());
        }
    }

    fn validate_tail(&self, errors: &mut Vec<String>) {
        let tail = &self.config.tail;
        if tail.poll_interval.is_zero() {
            errors.push("tail.poll_interval must be greater than zero".to_string());
        }
        if tail.sources_per_tick == 0 || tail.recent_limit == 0 || tail.recency_capacity == 0 {
            errors.push(
                "tail.sources_per_tick, tail.recent_limit and tail.recency_capacity must be positive"
                    .to_string(),
            );
        }
    }
}
