use crate::{
    core::identifiers::{MediaGroupKey, MessageId, OwnerId, StreamId, TaskId},
    task::status::TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Inclusive id range. `end_id = None` means "the most recent messages".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start_id: MessageId,
    pub end_id: Option<MessageId>,
}

impl IdRange {
    pub fn new(start_id: MessageId, end_id: Option<MessageId>) -> Self {
        Self { start_id, end_id }
    }

    pub fn bounded(start_id: MessageId, end_id: MessageId) -> Self {
        Self::new(start_id, Some(end_id))
    }

    pub fn span(&self) -> Option<u64> {
        self.end_id
            .map(|end| (end - self.start_id + 1).max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskMode {
    Backfill { range: IdRange },
    Tail { extra_sources: Vec<StreamId> },
}

/// Total work of a task, either counted or approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Total {
    Exact(u64),
    Estimated(u64),
    #[default]
    Unknown,
}

impl Total {
    pub fn value(&self) -> Option<u64> {
        match self {
            Total::Exact(n) | Total::Estimated(n) => Some(*n),
            Total::Unknown => None,
        }
    }

    pub fn is_estimate(&self) -> bool {
        matches!(self, Total::Estimated(_))
    }
}

impl fmt::Display for Total {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Total::Exact(n) => write!(f, "{n}"),
            Total::Estimated(n) => write!(f, "~{n}"),
            Total::Unknown => f.write_str("?"),
        }
    }
}

/// Progress counters.
///
/// `processed_count` covers every examined source id that did not fail:
/// sent, filtered out, empty after transform, or missing at the source.
/// `skipped_count` is the filtered-out part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current_id: Option<MessageId>,
    pub total: Total,
    pub processed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub sent_items: u64,
    pub sent_units: u64,
    pub last_checkpoint_id: Option<MessageId>,
    /// Split of the counters by source stream. Only tail tasks fill it.
    pub by_source: BTreeMap<StreamId, SourceStats>,
}

impl TaskProgress {
    pub fn examined(&self) -> u64 {
        self.processed_count + self.failed_count
    }
}

/// Counters of one source of a tail task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub processed: u64,
    pub sent_items: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub is_resumed: bool,
    pub resume_from_id: Option<MessageId>,
}

/// Persisted part of a tail cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailCursorState {
    pub last_seen_id: Option<MessageId>,
    pub recent_ids: Vec<MessageId>,
    pub recent_groups: Vec<MediaGroupKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub owner: OwnerId,
    pub source: StreamId,
    pub target: StreamId,
    pub mode: TaskMode,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub resume: ResumeInfo,
    pub tail_cursors: BTreeMap<StreamId, TailCursorState>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new(owner: OwnerId, source: StreamId, target: StreamId, mode: TaskMode) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            owner,
            source,
            target,
            mode,
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            resume: ResumeInfo::default(),
            tail_cursors: BTreeMap::new(),
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    pub fn backfill(owner: OwnerId, source: StreamId, target: StreamId, range: IdRange) -> Self {
        Self::new(owner, source, target, TaskMode::Backfill { range })
    }

    pub fn tail(
        owner: OwnerId,
        source: StreamId,
        target: StreamId,
        extra_sources: Vec<StreamId>,
    ) -> Self {
        Self::new(owner, source, target, TaskMode::Tail { extra_sources })
    }

    pub fn is_tail(&self) -> bool {
        matches!(self.mode, TaskMode::Tail { .. })
    }

    pub fn range(&self) -> Option<IdRange> {
        match self.mode {
            TaskMode::Backfill { range } => Some(range),
            TaskMode::Tail { .. } => None,
        }
    }

    /// Every stream this task reads from; the primary source first.
    pub fn sources(&self) -> Vec<StreamId> {
        let mut out = vec![self.source.clone()];
        if let TaskMode::Tail { extra_sources } = &self.mode {
            for s in extra_sources {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
        }
        out
    }

    /// Applies a partial update. Position markers never move backwards and
    /// status changes the lifecycle does not allow are ignored.
    pub fn apply(&mut self, update: &TaskUpdate) {
        let now = Utc::now();

        if let Some(status) = update.status
            && (status == self.status || self.status.can_transition_to(status))
        {
            if status == TaskStatus::Running && self.started_at.is_none() {
                self.started_at = Some(now);
            }
            self.finished_at = status.is_terminal().then_some(now);
            self.status = status;
        }

        if let Some(progress) = &update.progress {
            let current_id = self.progress.current_id.max(progress.current_id);
            let last_checkpoint_id = self
                .progress
                .last_checkpoint_id
                .max(progress.last_checkpoint_id);
            self.progress = progress.clone();
            self.progress.current_id = current_id;
            self.progress.last_checkpoint_id = last_checkpoint_id;
        }

        if let Some(range) = update.range
            && let TaskMode::Backfill { range: current } = &mut self.mode
        {
            *current = range;
        }

        if let Some(resume) = &update.resume {
            self.resume = resume.clone();
        }

        if let Some(cursors) = &update.tail_cursors {
            self.tail_cursors = cursors.clone();
        }

        if let Some(error) = &update.error {
            self.error = error.clone();
        }

        self.updated_at = now;
    }
}

/// Partial update of a stored task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<TaskProgress>,
    pub range: Option<IdRange>,
    pub resume: Option<ResumeInfo>,
    pub tail_cursors: Option<BTreeMap<StreamId, TailCursorState>>,
    pub error: Option<Option<String>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: TaskProgress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: TaskProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_range(mut self, range: IdRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_resume(mut self, resume: ResumeInfo) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn with_tail_cursors(mut self, cursors: BTreeMap<StreamId, TailCursorState>) -> Self {
        self.tail_cursors = Some(cursors);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::backfill(
            "owner".into(),
            "src".into(),
            "dst".into(),
            IdRange::bounded(1, 10),
        )
    }

    #[test]
    fn position_markers_never_regress() {
        let mut rec = record();
        rec.apply(&TaskUpdate::progress(TaskProgress {
            current_id: Some(8),
            last_checkpoint_id: Some(8),
            ..Default::default()
        }));
        rec.apply(&TaskUpdate::progress(TaskProgress {
            current_id: Some(5),
            last_checkpoint_id: Some(4),
            processed_count: 3,
            ..Default::default()
        }));

        assert_eq!(rec.progress.current_id, Some(8));
        assert_eq!(rec.progress.last_checkpoint_id, Some(8));
        assert_eq!(rec.progress.processed_count, 3);
    }

    #[test]
    fn progress_update_replaces_source_split() {
        let mut rec = record();
        let mut progress = TaskProgress::default();
        progress.by_source.insert(
            "src".into(),
            SourceStats {
                processed: 4,
                sent_items: 3,
                skipped: 1,
                ..Default::default()
            },
        );
        rec.apply(&TaskUpdate::progress(progress));

        let stats = &rec.progress.by_source[&StreamId::from("src")];
        assert_eq!((stats.processed, stats.sent_items, stats.skipped), (4, 3, 1));
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn terminal_status_stamps_finish_time() {
        let mut rec = record();
        rec.apply(&TaskUpdate::status(TaskStatus::Running));
        assert!(rec.started_at.is_some());
        assert!(rec.finished_at.is_none());

        rec.apply(&TaskUpdate::status(TaskStatus::Completed));
        assert!(rec.finished_at.is_some());
    }

    #[test]
    fn disallowed_status_change_is_ignored() {
        let mut rec = record();
        rec.apply(&TaskUpdate::status(TaskStatus::Running));
        rec.apply(&TaskUpdate::status(TaskStatus::Completed));
        rec.apply(&TaskUpdate::status(TaskStatus::Paused).with_error(Some("late".into())));

        assert_eq!(rec.status, TaskStatus::Completed);
        assert_eq!(rec.error.as_deref(), Some("late"));
    }

    #[test]
    fn tail_sources_are_deduplicated() {
        let rec = TaskRecord::tail(
            "owner".into(),
            "a".into(),
            "dst".into(),
            vec!["b".into(), "a".into()],
        );
        let sources: Vec<_> = rec.sources().iter().map(|s| s.to_string()).collect();
        assert_eq!(sources, vec!["a", "b"]);
    }
}
