use engine_config::settings::FetchConfig;
use std::time::Duration;
use tracing::info;

/// Grows or shrinks the nominal batch size from observed processing times.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    size: usize,
    min: usize,
    max: usize,
    step: usize,
    adjust_every: usize,
    fast: Duration,
    slow: Duration,
    samples: Vec<Duration>,
}

impl BatchSizer {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            size: config.initial_batch.clamp(config.min_batch, config.max_batch),
            min: config.min_batch,
            max: config.max_batch,
            step: config.batch_step,
            adjust_every: config.adjust_every.max(1),
            fast: config.fast_threshold,
            slow: config.slow_threshold,
            samples: Vec::with_capacity(config.adjust_every),
        }
    }

    pub fn current(&self) -> usize {
        self.size
    }

    /// Records how long one batch took end to end. Returns the new size when
    /// it changed.
    pub fn record(&mut self, elapsed: Duration) -> Option<usize> {
        self.samples.push(elapsed);
        if self.samples.len() < self.adjust_every {
            return None;
        }

        let total: Duration = self.samples.iter().sum();
        let avg = total / self.samples.len() as u32;
        self.samples.clear();

        let next = if avg < self.fast {
            (self.size + self.step).min(self.max)
        } else if avg > self.slow {
            self.size.saturating_sub(self.step).max(self.min)
        } else {
            self.size
        };

        if next == self.size {
            return None;
        }

        info!(
            from = self.size,
            to = next,
            avg_ms = avg.as_millis() as u64,
            "Adjusted batch size"
        );
        self.size = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> BatchSizer {
        BatchSizer::new(&FetchConfig::default())
    }

    #[test]
    fn grows_after_a_run_of_fast_batches() {
        let mut s = sizer();
        for _ in 0..4 {
            assert_eq!(s.record(Duration::from_millis(500)), None);
        }
        assert_eq!(s.record(Duration::from_millis(500)), Some(600));
    }

    #[test]
    fn shrinks_but_not_below_floor() {
        let mut s = sizer();
        for _ in 0..50 {
            s.record(Duration::from_secs(8));
        }
        assert_eq!(s.current(), 200);
    }

    #[test]
    fn steady_batches_keep_size() {
        let mut s = sizer();
        for _ in 0..10 {
            assert_eq!(s.record(Duration::from_secs(3)), None);
        }
        assert_eq!(s.current(), 500);
    }

    #[test]
    fn never_exceeds_ceiling() {
        let mut s = sizer();
        for _ in 0..100 {
            s.record(Duration::from_millis(10));
        }
        assert_eq!(s.current(), 1000);
    }
}
