use crate::{error::ProgressError, state::TaskStore};
use chrono::{DateTime, Utc};
use model::{
    core::identifiers::{MessageId, StreamId, TaskId},
    task::{
        record::{IdRange, SourceStats, TaskRecord, Total},
        status::TaskStatus,
    },
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};

/// Ranges wider than this report an estimated total instead of an exact one.
pub const EXACT_TOTAL_LIMIT: u64 = 10_000;

/// Total to report for a range before any fetching happens.
pub fn estimate_total(range: &IdRange) -> Total {
    match range.span() {
        None => Total::Unknown,
        Some(span) if span <= EXACT_TOTAL_LIMIT => Total::Exact(span),
        // Deleted ids make wide ranges sparse; the span is only an upper bound.
        Some(span) => Total::Estimated(span),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressStatus {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub current_id: Option<MessageId>,
    pub total: Total,
    pub percent: Option<f64>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub skipped_count: u64,
    pub last_checkpoint_id: Option<MessageId>,
    pub by_source: BTreeMap<StreamId, SourceStats>,
    pub is_resumed: bool,
    pub last_transition: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProgressStatus {
    pub fn from_record(record: &TaskRecord, last_transition: Option<DateTime<Utc>>) -> Self {
        let progress = &record.progress;
        let percent = match (record.status, progress.total.value()) {
            (TaskStatus::Completed, _) => Some(100.0),
            (_, Some(0)) | (_, None) => None,
            (_, Some(total)) => {
                Some((progress.examined() as f64 / total as f64 * 100.0).min(100.0))
            }
        };

        Self {
            task_id: record.id.clone(),
            status: record.status,
            current_id: progress.current_id,
            total: progress.total,
            percent,
            processed_count: progress.processed_count,
            failed_count: progress.failed_count,
            skipped_count: progress.skipped_count,
            last_checkpoint_id: progress.last_checkpoint_id,
            by_source: progress.by_source.clone(),
            is_resumed: record.resume.is_resumed,
            last_transition,
            error: record.error.clone(),
        }
    }
}

/// Read-only progress view over a [`TaskStore`].
#[derive(Clone)]
pub struct ProgressService {
    store: Arc<dyn TaskStore>,
}

impl ProgressService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        ProgressService { store }
    }

    pub async fn task_status(&self, id: &TaskId) -> Result<ProgressStatus, ProgressError> {
        let record = self
            .store
            .load_task(id)
            .await?
            .ok_or_else(|| ProgressError::NotFound(id.clone()))?;
        let last_transition = self
            .store
            .task_history(id)
            .await?
            .last()
            .map(|entry| entry.at);

        Ok(ProgressStatus::from_record(&record, last_transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::sled_store::SledTaskStore;
    use model::task::{
        journal::JournalEntry,
        record::{TaskProgress, TaskUpdate},
    };
    use tempfile::tempdir;

    #[test]
    fn narrow_ranges_are_exact_and_wide_ones_estimated() {
        assert_eq!(estimate_total(&IdRange::bounded(100, 149)), Total::Exact(50));
        assert_eq!(
            estimate_total(&IdRange::bounded(1, 50_000)),
            Total::Estimated(50_000)
        );
        assert_eq!(estimate_total(&IdRange::new(5, None)), Total::Unknown);
    }

    #[tokio::test]
    async fn reports_percent_and_last_transition() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SledTaskStore::open(dir.path()).unwrap());
        let rec = TaskRecord::backfill(
            "alice".into(),
            "src".into(),
            "dst".into(),
            IdRange::bounded(1, 200),
        );
        store.create_task(&rec).await.unwrap();
        store
            .update_task_progress(
                &rec.id,
                TaskUpdate::status(TaskStatus::Running).with_progress(TaskProgress {
                    total: Total::Exact(200),
                    processed_count: 45,
                    failed_count: 5,
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        store
            .append_journal(&JournalEntry::transition(
                rec.id.clone(),
                Some(TaskStatus::Pending),
                TaskStatus::Running,
                None,
            ))
            .await
            .unwrap();

        let service = ProgressService::new(store);
        let status = service.task_status(&rec.id).await.unwrap();
        assert_eq!(status.percent, Some(25.0));
        assert!(status.last_transition.is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SledTaskStore::open(dir.path()).unwrap());
        let service = ProgressService::new(store);
        assert!(matches!(
            service.task_status(&"nope".into()).await,
            Err(ProgressError::NotFound(_))
        ));
    }
}
