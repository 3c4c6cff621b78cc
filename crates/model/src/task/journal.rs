use crate::{core::identifiers::TaskId, task::status::TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub task_id: TaskId,
    pub at: DateTime<Utc>,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub note: Option<String>,
}

impl JournalEntry {
    pub fn transition(
        task_id: TaskId,
        from: Option<TaskStatus>,
        to: TaskStatus,
        note: Option<String>,
    ) -> Self {
        Self {
            task_id,
            at: Utc::now(),
            from,
            to,
            note,
        }
    }
}
