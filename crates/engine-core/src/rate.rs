use engine_config::settings::RateConfig;
use std::{collections::VecDeque, time::Duration};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
    throttled_until: Option<Instant>,
}

/// Point-in-time view of a [`RateController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStats {
    pub calls_in_window: usize,
    pub throttled_for: Option<Duration>,
}

/// Sliding-window limiter shared by every task that talks to one transport
/// account. Also carries the platform-mandated cool-down.
#[derive(Debug)]
pub struct RateController {
    state: Mutex<RateWindow>,
    window: Duration,
    max_calls: usize,
    severe_wait: Duration,
}

impl RateController {
    pub fn new(config: &RateConfig) -> Self {
        Self {
            state: Mutex::new(RateWindow::default()),
            window: config.window,
            max_calls: config.max_calls.max(1),
            severe_wait: config.severe_wait,
        }
    }

    /// Returns once one outbound call may be made, recording it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                match state.throttled_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        state.throttled_until = None;
                        self.evict(&mut state.calls, now);

                        if state.calls.len() < self.max_calls {
                            state.calls.push_back(now);
                            return;
                        }

                        // Saturated: wait for the oldest call to leave the window.
                        match state.calls.front() {
                            Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                            None => Duration::ZERO,
                        }
                    }
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting");
            sleep(wait).await;
        }
    }

    /// Blocks every caller of [`acquire`](Self::acquire) for `wait`. Overlapping
    /// reports keep the later deadline.
    pub async fn report_throttled(&self, wait: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + wait;
        state.throttled_until = Some(match state.throttled_until {
            Some(current) if current > until => current,
            _ => until,
        });

        if wait >= self.severe_wait {
            warn!(
                wait_secs = wait.as_secs(),
                "Severe platform throttle, all transport calls suspended until it expires"
            );
        } else {
            info!(wait_secs = wait.as_secs(), "Platform throttle reported");
        }
    }

    pub async fn stats(&self) -> RateStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.evict(&mut state.calls, now);
        RateStats {
            calls_in_window: state.calls.len(),
            throttled_for: state
                .throttled_until
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }

    fn evict(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}
