use crate::task::{
    TaskLink,
    control::{StopReason, TaskControl},
};
use engine_config::settings::SchedulerConfig;
use model::{
    core::identifiers::{OwnerId, TaskId},
    task::record::TaskRecord,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("{limit} tasks are already running")]
    GlobalLimit { limit: usize },

    #[error("owner {owner} already runs {limit} tasks")]
    OwnerLimit { owner: OwnerId, limit: usize },

    #[error("task {0} is already running")]
    AlreadyActive(TaskId),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

struct ActiveTask {
    owner: OwnerId,
    control: Arc<TaskControl>,
    live: watch::Receiver<TaskRecord>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
    active: HashMap<TaskId, ActiveTask>,
    per_owner: HashMap<OwnerId, usize>,
    closed: bool,
}

impl SchedulerState {
    fn release(&mut self, id: &TaskId) {
        let Some(task) = self.active.remove(id) else {
            return;
        };
        if let Some(count) = self.per_owner.get_mut(&task.owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_owner.remove(&task.owner);
            }
        }
    }
}

/// Admits tasks under a global and a per-owner concurrency limit and keeps
/// the handles of everything running.
///
/// Admission is checked and recorded under one lock, so two concurrent
/// starts can never both take the last slot.
#[derive(Clone)]
pub struct TaskScheduler {
    limits: SchedulerConfig,
    state: Arc<Mutex<SchedulerState>>,
}

impl TaskScheduler {
    pub fn new(limits: SchedulerConfig) -> Self {
        Self {
            limits,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admits `record` and spawns the future built by `launch`.
    ///
    /// With a `timeout`, the task is stopped as timed out once it has run
    /// that long; it still gets to write its final state.
    pub fn admit<F, Fut>(
        &self,
        record: TaskRecord,
        timeout: Option<Duration>,
        launch: F,
    ) -> Result<watch::Receiver<TaskRecord>, AdmitError>
    where
        F: FnOnce(TaskRecord, TaskLink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if state.closed {
            return Err(AdmitError::ShuttingDown);
        }
        if state.active.contains_key(&record.id) {
            return Err(AdmitError::AlreadyActive(record.id.clone()));
        }
        if state.active.len() >= self.limits.max_concurrent_tasks {
            return Err(AdmitError::GlobalLimit {
                limit: self.limits.max_concurrent_tasks,
            });
        }
        let owned = state.per_owner.get(&record.owner).copied().unwrap_or(0);
        if owned >= self.limits.max_tasks_per_owner {
            return Err(AdmitError::OwnerLimit {
                owner: record.owner.clone(),
                limit: self.limits.max_tasks_per_owner,
            });
        }

        let id = record.id.clone();
        let owner = record.owner.clone();
        let control = Arc::new(TaskControl::new());
        let (live_tx, live_rx) = watch::channel(record.clone());
        let task = launch(
            record,
            TaskLink {
                control: control.clone(),
                live: live_tx,
            },
        );

        let watchdog = control.clone();
        let shared = self.state.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            match timeout {
                Some(limit) => {
                    tokio::pin!(task);
                    tokio::select! {
                        _ = &mut task => {}
                        _ = sleep(limit) => {
                            if watchdog.stop(StopReason::TimedOut) {
                                warn!(task_id = %task_id, timeout_s = limit.as_secs(), "Task timed out");
                            }
                            task.await;
                        }
                    }
                }
                None => task.await,
            }

            let mut state = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.release(&task_id);
        });

        *state.per_owner.entry(owner.clone()).or_insert(0) += 1;
        state.active.insert(
            id.clone(),
            ActiveTask {
                owner: owner.clone(),
                control,
                live: live_rx.clone(),
                handle: Some(handle),
            },
        );
        info!(
            task_id = %id,
            owner = %owner,
            active = state.active.len(),
            "Task admitted"
        );

        Ok(live_rx)
    }

    pub fn control(&self, id: &TaskId) -> Option<Arc<TaskControl>> {
        self.lock().active.get(id).map(|t| t.control.clone())
    }

    pub fn live(&self, id: &TaskId) -> Option<watch::Receiver<TaskRecord>> {
        self.lock().active.get(id).map(|t| t.live.clone())
    }

    pub fn is_active(&self, id: &TaskId) -> bool {
        self.lock().active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn owner_count(&self, owner: &OwnerId) -> usize {
        self.lock().per_owner.get(owner).copied().unwrap_or(0)
    }

    /// Refuses new admissions, stops every running task with `reason` and
    /// waits for all of them to write their final state.
    pub async fn shutdown(&self, reason: StopReason) {
        let handles: Vec<(TaskId, JoinHandle<()>)> = {
            let mut state = self.lock();
            state.closed = true;
            state
                .active
                .iter_mut()
                .filter_map(|(id, task)| {
                    task.control.stop(reason);
                    task.handle.take().map(|h| (id.clone(), h))
                })
                .collect()
        };

        info!(tasks = handles.len(), "Stopping running tasks");
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(task_id = %id, error = %e, "Task ended abnormally");
            }
        }
    }
}
