use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Why a running task was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// Owner ended a tail task; it finishes as completed.
    Finished,
    /// Engine shutdown; the task is left resumable.
    Shutdown,
    TimedOut,
}

/// Pause and stop signals shared between the engine and one running task.
///
/// The first stop request wins; later ones do not change the reason.
#[derive(Debug)]
pub struct TaskControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    reason: Mutex<Option<StopReason>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused,
            reason: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `false` if the task was already stopping.
    pub fn stop(&self, reason: StopReason) -> bool {
        let mut current = match self.reason.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        drop(current);
        self.cancel.cancel();
        true
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.reason.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn watch_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Waits while paused. Returns `false` once a stop was requested.
    pub async fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return !self.cancel.is_cancelled();
                    }
                }
            }
        }
    }
}
