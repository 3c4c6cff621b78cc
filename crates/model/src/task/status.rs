use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Lifecycle of a replication task.
///
/// `Pending -> Running <-> Paused`, `Running -> {Completed, Failed, Cancelled}`.
/// `Failed`, `Cancelled` and `Paused` tasks may be re-admitted through resume.
/// A paused task may still reach a terminal state when the work it had in
/// flight finishes the range or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
#[error("unknown task status: {0}")]
pub struct ParseStatusError(String);

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            TaskStatus::Paused | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running | Cancelled | Failed) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            (Paused, Running | Completed | Cancelled | Failed) => true,
            (Failed | Cancelled, Running) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStatus::*;

    #[test]
    fn completed_is_final() {
        for next in [Pending, Running, Paused, Failed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
        }
    }

    #[test]
    fn pause_is_reversible_only_from_running() {
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Paused));
    }

    #[test]
    fn failed_and_cancelled_can_be_resumed() {
        assert!(Failed.is_terminal() && Failed.is_resumable());
        assert!(Cancelled.can_transition_to(Running));
        assert!(!Completed.is_resumable());
    }
}
