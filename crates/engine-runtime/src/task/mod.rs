use crate::task::{
    checkpoint::Checkpointer,
    control::{StopReason, TaskControl},
};
use chrono::Utc;
use engine_config::settings::EngineConfig;
use engine_core::{
    error::{StoreError, TransportError},
    event_bus::bus::EventBus,
    metrics::Metrics,
    rate::RateController,
    retry::{RetryDisposition, RetryPolicy},
    state::TaskStore,
    transport::Transport,
};
use engine_processing::{
    fetch::range::RangeFetcher, processor::UnitProcessor, retry::classify_transport_error,
};
use model::{
    core::identifiers::StreamId,
    events::TaskStatusChanged,
    task::{
        journal::JournalEntry,
        record::{TaskRecord, TaskUpdate},
        status::TaskStatus,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub mod backfill;
pub mod checkpoint;
pub mod control;
pub mod tail;

/// Journal note left on tasks paused by an engine shutdown.
pub const SHUTDOWN_NOTE: &str = "engine shutdown";

/// Collaborators shared by every running task.
pub struct TaskServices {
    pub store: Arc<dyn TaskStore>,
    pub transport: Arc<dyn Transport>,
    pub rate: Arc<RateController>,
    pub fetcher: Arc<RangeFetcher>,
    pub processor: Arc<UnitProcessor>,
    pub config: Arc<EngineConfig>,
    pub events: EventBus,
    pub metrics: Metrics,
}

impl TaskServices {
    /// Confirms every stream is reachable before any work starts.
    pub async fn validate_entities(&self, streams: &[StreamId]) -> Result<(), String> {
        let policy = RetryPolicy::default();
        for stream in streams {
            policy
                .run(
                    || async move {
                        self.rate.acquire().await;
                        let result = self.transport.get_entity(stream).await;
                        if let Err(TransportError::Throttled { wait }) = &result {
                            self.rate.report_throttled(*wait).await;
                        }
                        result
                    },
                    |err| match classify_transport_error(err) {
                        RetryDisposition::WaitThenRetry(_) => {
                            RetryDisposition::WaitThenRetry(Duration::ZERO)
                        }
                        other => other,
                    },
                )
                .await
                .map_err(|e| format!("cannot access {stream}: {}", e.into_inner()))?;
        }
        Ok(())
    }
}

/// Engine-side handle of one running task.
pub struct TaskLink {
    pub control: Arc<TaskControl>,
    /// Latest in-memory state, ahead of the throttled checkpoint.
    pub live: watch::Sender<TaskRecord>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Stopped(StopReason),
    Failed(String),
}

impl RunEnd {
    fn resolve(&self, timeout: Duration) -> (TaskStatus, Option<String>, Option<String>) {
        match self {
            RunEnd::Completed => (TaskStatus::Completed, None, None),
            RunEnd::Stopped(StopReason::Cancelled) => {
                (TaskStatus::Cancelled, None, Some("cancelled by owner".into()))
            }
            RunEnd::Stopped(StopReason::Finished) => {
                (TaskStatus::Completed, None, Some("stopped by owner".into()))
            }
            RunEnd::Stopped(StopReason::Shutdown) => {
                (TaskStatus::Paused, None, Some(SHUTDOWN_NOTE.into()))
            }
            RunEnd::Stopped(StopReason::TimedOut) => {
                let reason = format!("timed out after {}s", timeout.as_secs());
                (TaskStatus::Failed, Some(reason.clone()), Some(reason))
            }
            RunEnd::Failed(reason) => (TaskStatus::Failed, Some(reason.clone()), Some(reason.clone())),
        }
    }
}

/// Journals a transition and announces it on the bus. Journal failures are
/// logged; they never fail the transition itself.
pub async fn record_transition(
    store: &dyn TaskStore,
    events: &EventBus,
    record: &TaskRecord,
    from: Option<TaskStatus>,
    note: Option<String>,
) {
    let entry = JournalEntry::transition(record.id.clone(), from, record.status, note.clone());
    if let Err(e) = store.append_journal(&entry).await {
        warn!(task_id = %record.id, error = %e, "Failed to journal transition");
    }

    info!(
        task_id = %record.id,
        owner = %record.owner,
        from = ?from,
        to = %record.status,
        "Task status changed"
    );

    if let Some(from) = from {
        events
            .publish(TaskStatusChanged {
                task_id: record.id.clone(),
                owner: record.owner.clone(),
                from,
                to: record.status,
                reason: note,
                timestamp: Utc::now(),
            })
            .await;
    }
}

/// State owned by one running task. The runner holding it is the only
/// writer of the task's stored record until it finishes.
pub(crate) struct TaskRun {
    pub services: Arc<TaskServices>,
    pub record: TaskRecord,
    pub link: TaskLink,
    checkpointer: Checkpointer,
}

impl TaskRun {
    pub fn new(services: Arc<TaskServices>, record: TaskRecord, link: TaskLink) -> Self {
        let checkpointer = Checkpointer::new(
            services.store.clone(),
            record.id.clone(),
            services.config.scheduler.checkpoint_interval,
            services.metrics.clone(),
            services.events.clone(),
        );
        Self {
            services,
            record,
            link,
            checkpointer,
        }
    }

    pub fn control(&self) -> &TaskControl {
        &self.link.control
    }

    pub fn stop_reason(&self) -> StopReason {
        self.link
            .control
            .stop_reason()
            .unwrap_or(StopReason::Cancelled)
    }

    pub fn publish_live(&self) {
        self.link.live.send_replace(self.record.clone());
    }

    /// Marks progress as changed and writes it if the interval has passed.
    pub async fn checkpoint(&mut self) {
        self.checkpointer.mark_dirty();
        self.publish_live();
        if !self.checkpointer.is_due() {
            return;
        }

        let update = self.progress_update();
        if let Err(e) = self.checkpointer.write(update).await {
            warn!(task_id = %self.record.id, error = %e, "Checkpoint write failed");
        }
    }

    fn progress_update(&self) -> TaskUpdate {
        let update = TaskUpdate::progress(self.record.progress.clone());
        if self.record.is_tail() {
            update.with_tail_cursors(self.record.tail_cursors.clone())
        } else {
            update
        }
    }

    /// Persists a status change together with the current progress.
    pub async fn transition(
        &mut self,
        to: TaskStatus,
        update: TaskUpdate,
        note: Option<String>,
    ) -> Result<(), StoreError> {
        let from = self.record.status;
        let mut update = update.with_status(to).with_progress(self.record.progress.clone());
        if self.record.is_tail() {
            update = update.with_tail_cursors(self.record.tail_cursors.clone());
        }

        let stored = self.checkpointer.write(update).await?;
        let changed = stored.status != from;
        self.record = stored;

        if changed {
            record_transition(
                self.services.store.as_ref(),
                &self.services.events,
                &self.record,
                Some(from),
                note,
            )
            .await;
        }
        // Watchers of the live record see a status only once it is journaled.
        self.publish_live();
        Ok(())
    }

    /// Holds the task while it is paused. Returns `false` once it must stop.
    pub async fn gate(&mut self) -> bool {
        if self.control().is_stopped() {
            return false;
        }
        if !self.control().is_paused() {
            return true;
        }

        if let Err(e) = self
            .transition(TaskStatus::Paused, TaskUpdate::default(), None)
            .await
        {
            error!(task_id = %self.record.id, error = %e, "Failed to persist pause");
        }

        let control = self.link.control.clone();
        if !control.wait_while_paused().await {
            return false;
        }

        if let Err(e) = self
            .transition(TaskStatus::Running, TaskUpdate::default(), Some("resumed".into()))
            .await
        {
            error!(task_id = %self.record.id, error = %e, "Failed to persist resume");
        }
        true
    }

    /// Writes the final state, journals it and publishes it.
    pub async fn finish(mut self, end: RunEnd) -> TaskRecord {
        let (status, error, note) = end.resolve(self.services.config.scheduler.task_timeout);

        if let Err(e) = self
            .transition(status, TaskUpdate::default().with_error(error.clone()), note)
            .await
        {
            error!(task_id = %self.record.id, error = %e, "Failed to persist final state");
            self.record.status = status;
            self.record.error = error;
            self.publish_live();
        }

        info!(
            task_id = %self.record.id,
            status = %self.record.status,
            processed = self.record.progress.processed_count,
            failed = self.record.progress.failed_count,
            sent_items = self.record.progress.sent_items,
            "Task finished"
        );
        self.record
    }
}
