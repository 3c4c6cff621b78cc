use std::time::Duration;
use tokio::time::Instant;

/// Per-source failure tracker for tail listings.
///
/// Each consecutive failure doubles the pause before the source is polled
/// again. Once `threshold` is reached the breaker is open and the pause
/// stays at `max_delay` until a listing succeeds.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
    retry_at: Option<Instant>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitBreakerState {
    RetryAfter(Duration),
    Open(Duration),
}

impl CircuitBreaker {
    pub fn new(threshold: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            base_delay,
            max_delay: max_delay.max(base_delay),
            retry_at: None,
        }
    }

    /// Whether the source may be polled at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    pub fn record_failure(&mut self, now: Instant) -> CircuitBreakerState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let state = if self.consecutive_failures >= self.threshold {
            CircuitBreakerState::Open(self.max_delay)
        } else {
            CircuitBreakerState::RetryAfter(self.delay_for(self.consecutive_failures))
        };

        let delay = match state {
            CircuitBreakerState::RetryAfter(d) | CircuitBreakerState::Open(d) => d,
        };
        self.retry_at = Some(now + delay);
        state
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.retry_at = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let exponent = failures.saturating_sub(1).min(6);
        let factor = 1u128 << exponent;
        let delay_ms = self.base_delay.as_millis().saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backs_off_then_opens() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(5), Duration::from_secs(300));
        let now = Instant::now();

        assert_eq!(
            cb.record_failure(now),
            CircuitBreakerState::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            cb.record_failure(now),
            CircuitBreakerState::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            cb.record_failure(now),
            CircuitBreakerState::Open(Duration::from_secs(300))
        );
        assert!(!cb.is_ready(now + Duration::from_secs(299)));
        assert!(cb.is_ready(now + Duration::from_secs(300)));
    }

    #[test]
    fn success_resets() {
        let mut cb = CircuitBreaker::new(2, Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        cb.record_failure(now);
        cb.record_success();

        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.is_ready(now));
    }
}
