use chrono::Utc;
use engine_core::{
    error::StoreError, event_bus::bus::EventBus, metrics::Metrics, retry::RetryPolicy,
    state::TaskStore,
};
use engine_processing::retry::classify_store_error;
use model::{
    core::identifiers::TaskId,
    events::TaskProgressed,
    task::record::{TaskRecord, TaskUpdate},
};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::debug;

/// Throttled writer of task progress.
///
/// Progress is written at most once per `interval` while a task runs;
/// lifecycle changes and the final state go through [`Checkpointer::write`]
/// immediately.
pub struct Checkpointer {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    interval: Duration,
    last_write: Instant,
    dirty: bool,
    retry: RetryPolicy,
    metrics: Metrics,
    events: EventBus,
}

impl Checkpointer {
    pub fn new(
        store: Arc<dyn TaskStore>,
        task_id: TaskId,
        interval: Duration,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            task_id,
            interval,
            last_write: Instant::now(),
            dirty: false,
            retry: RetryPolicy::for_store(),
            metrics,
            events,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// True once progress changed and the interval since the last write
    /// has elapsed.
    pub fn is_due(&self) -> bool {
        self.dirty && self.last_write.elapsed() >= self.interval
    }

    /// Writes now, retrying transient storage failures.
    pub async fn write(&mut self, update: TaskUpdate) -> Result<TaskRecord, StoreError> {
        let store = &self.store;
        let task_id = &self.task_id;
        let record = self
            .retry
            .run(
                || {
                    let update = update.clone();
                    async move { store.update_task_progress(task_id, update).await }
                },
                classify_store_error,
            )
            .await
            .map_err(|e| e.into_inner())?;

        self.last_write = Instant::now();
        self.dirty = false;

        if update.progress.is_some() {
            self.metrics.increment_checkpoints();
            debug!(
                task_id = %self.task_id,
                current_id = ?record.progress.current_id,
                processed = record.progress.processed_count,
                "Checkpoint written"
            );
            self.events
                .publish(TaskProgressed {
                    task_id: self.task_id.clone(),
                    current_id: record.progress.current_id,
                    processed_count: record.progress.processed_count,
                    failed_count: record.progress.failed_count,
                    timestamp: Utc::now(),
                })
                .await;
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use model::task::record::{IdRange, TaskProgress};

    async fn setup() -> (Arc<MemoryStore>, Checkpointer, TaskId) {
        let store = Arc::new(MemoryStore::default());
        let record = TaskRecord::backfill(
            "owner".into(),
            "src".into(),
            "dst".into(),
            IdRange::bounded(1, 100),
        );
        store.create_task(&record).await.unwrap();
        let checkpointer = Checkpointer::new(
            store.clone(),
            record.id.clone(),
            Duration::from_secs(10),
            Metrics::new(),
            EventBus::new(),
        );
        (store, checkpointer, record.id)
    }

    fn progress(current: i64) -> TaskUpdate {
        TaskUpdate::progress(TaskProgress {
            current_id: Some(current),
            last_checkpoint_id: Some(current),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn writes_at_most_once_per_interval() {
        let (store, mut checkpointer, id) = setup().await;

        checkpointer.mark_dirty();
        assert!(!checkpointer.is_due());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(checkpointer.is_due());
        checkpointer.write(progress(7)).await.unwrap();

        checkpointer.mark_dirty();
        assert!(!checkpointer.is_due());

        let stored = store.load_task(&id).await.unwrap().unwrap();
        assert_eq!(stored.progress.current_id, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_state_is_not_rewritten() {
        let (_store, mut checkpointer, _id) = setup().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!checkpointer.is_due());
    }

    #[tokio::test]
    async fn forced_write_goes_through_immediately() {
        let (store, mut checkpointer, id) = setup().await;
        checkpointer.write(progress(3)).await.unwrap();

        let stored = store.load_task(&id).await.unwrap().unwrap();
        assert_eq!(stored.progress.last_checkpoint_id, Some(3));
    }
}
