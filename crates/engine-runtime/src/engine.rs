use crate::{
    actor::{
        ActorRef, spawn_actor,
        ticker::{TickLatch, TickScheduler},
    },
    error::EngineError,
    scheduler::TaskScheduler,
    tail::{PollerMsg, TailPoller},
    task::{
        SHUTDOWN_NOTE, TaskServices,
        backfill::BackfillRunner,
        control::StopReason,
        record_transition,
        tail::TailRunner,
    },
};
use engine_config::settings::EngineConfig;
use engine_core::{
    event_bus::bus::EventBus,
    metrics::{Metrics, MetricsSnapshot},
    progress::{ProgressService, ProgressStatus, estimate_total},
    rate::{RateController, RateStats},
    state::TaskStore,
    transform::ContentTransform,
    transport::Transport,
};
use engine_processing::{
    dispatch::Dispatcher, fetch::range::RangeFetcher, processor::UnitProcessor,
};
use model::{
    core::identifiers::{OwnerId, StreamId, TaskId},
    records::message::Message,
    task::{
        journal::JournalEntry,
        record::{IdRange, ResumeInfo, TaskRecord, TaskUpdate},
        status::TaskStatus,
    },
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLLER_MAILBOX: usize = 256;

/// What to create.
#[derive(Debug, Clone)]
pub enum NewTask {
    Backfill {
        owner: OwnerId,
        source: StreamId,
        target: StreamId,
        range: IdRange,
    },
    Tail {
        owner: OwnerId,
        source: StreamId,
        target: StreamId,
        extra_sources: Vec<StreamId>,
    },
}

/// Entry point for every task command.
///
/// Owns the shared rate controller, the task scheduler and the tail poller.
/// Must be started inside a Tokio runtime.
pub struct Engine {
    services: Arc<TaskServices>,
    scheduler: TaskScheduler,
    progress: ProgressService,
    poller: ActorRef<PollerMsg>,
    poller_handle: Mutex<Option<JoinHandle<()>>>,
    background: CancellationToken,
}

impl Engine {
    pub fn start(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn TaskStore>,
        transform: Arc<dyn ContentTransform>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Metrics::new();
        let events = EventBus::new();
        let rate = Arc::new(RateController::new(&config.rate));
        let fetcher = Arc::new(RangeFetcher::new(
            transport.clone(),
            rate.clone(),
            config.fetch.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            transport.clone(),
            rate.clone(),
            &config.dispatch,
            metrics.clone(),
            events.clone(),
        ));
        let processor = Arc::new(UnitProcessor::new(transform, dispatcher, metrics.clone()));

        let background = CancellationToken::new();
        let latch = TickLatch::default();
        let poller = TailPoller::new(
            fetcher.clone(),
            processor.clone(),
            config.tail.clone(),
            latch.clone(),
        );
        let (poller_ref, poller_handle) =
            spawn_actor("tail-poller", POLLER_MAILBOX, poller, background.clone());
        TickScheduler::new(
            poller_ref.clone(),
            config.tail.poll_interval,
            latch,
            || PollerMsg::Tick,
        )
        .spawn(background.clone());

        info!(
            max_concurrent_tasks = config.scheduler.max_concurrent_tasks,
            max_tasks_per_owner = config.scheduler.max_tasks_per_owner,
            rate_max_calls = config.rate.max_calls,
            "Engine started"
        );

        let scheduler = TaskScheduler::new(config.scheduler.clone());
        let progress = ProgressService::new(store.clone());
        let services = Arc::new(TaskServices {
            store,
            transport,
            rate,
            fetcher,
            processor,
            config: Arc::new(config),
            events,
            metrics,
        });

        Ok(Self {
            services,
            scheduler,
            progress,
            poller: poller_ref,
            poller_handle: Mutex::new(Some(poller_handle)),
            background,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }

    pub async fn rate_stats(&self) -> RateStats {
        self.services.rate.stats().await
    }

    pub fn active_tasks(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Validates and stores a new task in `pending` state.
    pub async fn create_task(&self, request: NewTask) -> Result<TaskRecord, EngineError> {
        let record = match request {
            NewTask::Backfill {
                owner,
                source,
                target,
                range,
            } => {
                validate_range(&range)?;
                let mut record = TaskRecord::backfill(owner, source, target, range);
                record.progress.total = estimate_total(&range);
                record
            }
            NewTask::Tail {
                owner,
                source,
                target,
                extra_sources,
            } => TaskRecord::tail(owner, source, target, extra_sources),
        };

        let sources = record.sources();
        if sources.contains(&record.target) {
            return Err(EngineError::ValidationFailed(format!(
                "target {} is also a source",
                record.target
            )));
        }

        let mut streams = sources;
        streams.push(record.target.clone());
        self.services
            .validate_entities(&streams)
            .await
            .map_err(EngineError::ValidationFailed)?;

        self.services.store.create_task(&record).await?;
        record_transition(
            self.services.store.as_ref(),
            &self.services.events,
            &record,
            None,
            Some("created".into()),
        )
        .await;

        Ok(record)
    }

    pub async fn start_task(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        let record = self.snapshot(id).await?;
        if record.status != TaskStatus::Pending || self.scheduler.is_active(id) {
            return Err(EngineError::InvalidState {
                id: id.clone(),
                status: record.status,
                action: "start",
            });
        }
        self.launch(record, ResumeInfo::default())
    }

    pub async fn pause_task(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        if let Some(control) = self.scheduler.control(id) {
            control.pause();
            info!(task_id = %id, "Pause requested");
            let mut snapshot = self.snapshot(id).await?;
            if snapshot.status == TaskStatus::Running {
                snapshot.status = TaskStatus::Paused;
            }
            return Ok(snapshot);
        }

        let record = self.load(id).await?;
        match record.status {
            TaskStatus::Paused => Ok(record),
            TaskStatus::Running => {
                self.set_status(&record, TaskStatus::Paused, "pause", None)
                    .await
            }
            status => Err(EngineError::InvalidState {
                id: id.clone(),
                status,
                action: "pause",
            }),
        }
    }

    /// Resumes a paused task in place, or re-admits an interrupted, failed
    /// or cancelled one from its last checkpoint.
    pub async fn resume_task(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        if let Some(control) = self.scheduler.control(id) {
            control.resume();
            let mut snapshot = self.snapshot(id).await?;
            if snapshot.status == TaskStatus::Paused {
                snapshot.status = TaskStatus::Running;
            }
            return Ok(snapshot);
        }

        let record = self.load(id).await?;
        match record.status {
            TaskStatus::Pending => self.launch(record, ResumeInfo::default()),
            TaskStatus::Completed => Err(EngineError::InvalidState {
                id: id.clone(),
                status: record.status,
                action: "resume",
            }),
            _ => {
                let resume = ResumeInfo {
                    is_resumed: true,
                    resume_from_id: record.progress.last_checkpoint_id.map(|id| id + 1),
                };
                self.launch(record, resume)
            }
        }
    }

    /// Cancels a task. A running task finishes its in-flight send first;
    /// the returned record is its final state.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        if let Some(control) = self.scheduler.control(id) {
            control.stop(StopReason::Cancelled);
            info!(task_id = %id, "Cancel requested");
            return self.wait(id).await;
        }

        let record = self.load(id).await?;
        self.set_status(
            &record,
            TaskStatus::Cancelled,
            "cancel",
            Some("cancelled by owner".into()),
        )
        .await
    }

    /// Ends a tail task; it finishes as completed.
    pub async fn stop_tail(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        let record = self.snapshot(id).await?;
        if !record.is_tail() {
            return Err(EngineError::InvalidState {
                id: id.clone(),
                status: record.status,
                action: "stop tailing",
            });
        }

        if let Some(control) = self.scheduler.control(id) {
            control.stop(StopReason::Finished);
            return self.wait(id).await;
        }
        self.set_status(
            &record,
            TaskStatus::Completed,
            "stop tailing",
            Some("stopped by owner".into()),
        )
        .await
    }

    /// Removes a finished task and its journal. Returns the removed record.
    pub async fn delete_task(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        let record = self.snapshot(id).await?;
        if !record.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: id.clone(),
                status: record.status,
                action: "delete",
            });
        }

        self.services.store.delete_task(id).await?;
        info!(task_id = %id, status = %record.status, "Task deleted");
        Ok(record)
    }

    /// Latest known state: in-memory for running tasks, stored otherwise.
    pub async fn snapshot(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        if let Some(live) = self.scheduler.live(id) {
            return Ok(live.borrow().clone());
        }
        self.load(id).await
    }

    pub async fn progress(&self, id: &TaskId) -> Result<ProgressStatus, EngineError> {
        let Some(live) = self.scheduler.live(id) else {
            return Ok(self.progress.task_status(id).await?);
        };
        let record = live.borrow().clone();
        let last_transition = self.history(id).await?.last().map(|e| e.at);
        Ok(ProgressStatus::from_record(&record, last_transition))
    }

    pub async fn history(&self, id: &TaskId) -> Result<Vec<JournalEntry>, EngineError> {
        Ok(self.services.store.task_history(id).await?)
    }

    pub async fn list_tasks(&self, owner: Option<&OwnerId>) -> Result<Vec<TaskRecord>, EngineError> {
        let mut tasks = self.services.store.list_tasks(owner).await?;
        for task in tasks.iter_mut() {
            if let Some(live) = self.scheduler.live(&task.id) {
                *task = live.borrow().clone();
            }
        }
        Ok(tasks)
    }

    /// Waits until the task stops running and returns its final state.
    pub async fn wait(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        if let Some(mut live) = self.scheduler.live(id) {
            let finished = live
                .wait_for(|r| r.status.is_terminal())
                .await
                .map(|r| r.clone());
            if let Ok(record) = finished {
                return Ok(record);
            }
        }
        self.load(id).await
    }

    /// Hands a platform-pushed message to the tail poller.
    pub async fn deliver(&self, msg: Message) -> Result<(), EngineError> {
        Ok(self.poller.send(PollerMsg::Deliver(msg)).await?)
    }

    /// Re-admits tasks left running by a crash or paused by a shutdown.
    pub async fn resume_interrupted(&self) -> Result<Vec<TaskRecord>, EngineError> {
        let mut resumed = Vec::new();
        for record in self.services.store.list_tasks(None).await? {
            let interrupted = match record.status {
                TaskStatus::Running => true,
                TaskStatus::Paused => self
                    .history(&record.id)
                    .await?
                    .last()
                    .is_some_and(|e| e.note.as_deref() == Some(SHUTDOWN_NOTE)),
                _ => false,
            };
            if !interrupted || self.scheduler.is_active(&record.id) {
                continue;
            }

            match self.resume_task(&record.id).await {
                Ok(record) => resumed.push(record),
                Err(e) => warn!(task_id = %record.id, error = %e, "Could not resume task"),
            }
        }
        Ok(resumed)
    }

    /// Stops every running task, leaving them paused and resumable, then
    /// stops the tail poller.
    pub async fn shutdown(&self) {
        info!(active = self.scheduler.active_count(), "Engine shutting down");
        self.scheduler.shutdown(StopReason::Shutdown).await;
        self.background.cancel();

        let handle = match self.poller_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Tail poller ended abnormally");
        }
        info!("Engine stopped");
    }

    fn launch(&self, record: TaskRecord, resume: ResumeInfo) -> Result<TaskRecord, EngineError> {
        let mut record = record;
        record.resume = resume;
        let timeout = (!record.is_tail()).then_some(self.services.config.scheduler.task_timeout);

        let services = self.services.clone();
        let poller = self.poller.clone();
        let live = self.scheduler.admit(record, timeout, move |record, link| async move {
            if record.is_tail() {
                TailRunner::new(services, record, link, poller).run().await;
            } else {
                BackfillRunner::new(services, record, link).run().await;
            }
        })?;

        let mut snapshot = live.borrow().clone();
        snapshot.status = TaskStatus::Running;
        Ok(snapshot)
    }

    async fn load(&self, id: &TaskId) -> Result<TaskRecord, EngineError> {
        self.services
            .store
            .load_task(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    /// Status change of a task that is not running.
    async fn set_status(
        &self,
        record: &TaskRecord,
        to: TaskStatus,
        action: &'static str,
        note: Option<String>,
    ) -> Result<TaskRecord, EngineError> {
        if !record.status.can_transition_to(to) {
            return Err(EngineError::InvalidState {
                id: record.id.clone(),
                status: record.status,
                action,
            });
        }

        let stored = self
            .services
            .store
            .update_task_progress(&record.id, TaskUpdate::status(to))
            .await?;
        record_transition(
            self.services.store.as_ref(),
            &self.services.events,
            &stored,
            Some(record.status),
            note,
        )
        .await;
        Ok(stored)
    }
}

fn validate_range(range: &IdRange) -> Result<(), EngineError> {
    if range.start_id < 1 {
        return Err(EngineError::InvalidRange(format!(
            "start_id must be positive, got {}",
            range.start_id
        )));
    }
    if let Some(end) = range.end_id
        && end < range.start_id
    {
        return Err(EngineError::InvalidRange(format!(
            "end_id {end} is before start_id {}",
            range.start_id
        )));
    }
    Ok(())
}
