use crate::{
    actor::{Actor, ActorContext, ticker::TickLatch},
    error::ActorError,
    tail::messages::{PollerMsg, TailRegistration, TailReport},
    task::control::TaskControl,
};
use async_trait::async_trait;
use engine_config::settings::{TailConfig, transform::TransformSettings};
use engine_processing::{
    assemble::assemble,
    cb::{CircuitBreaker, CircuitBreakerState},
    fetch::range::RangeFetcher,
    processor::UnitProcessor,
    tail::cursor::TailCursor,
};
use futures::{
    FutureExt, StreamExt,
    future::{self, BoxFuture},
    stream,
};
use model::{
    core::identifiers::{MediaGroupKey, MessageId, OwnerId, StreamId, TaskId},
    records::message::Message,
    task::record::TailCursorState,
};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    sync::{Mutex, OwnedMutexGuard, mpsc},
    time::Instant,
};
use tracing::{debug, info, warn};

struct SourceState {
    stream: StreamId,
    cursor: TailCursor,
    settings: TransformSettings,
    breaker: CircuitBreaker,
    /// Trailing group seen in the previous listing, not yet forwarded.
    held: Option<(MediaGroupKey, Vec<MessageId>)>,
    /// Pushed messages not yet taken by a job.
    inbox: mpsc::UnboundedReceiver<Message>,
    /// New messages that could not go out yet, re-examined on the next turn.
    pending: Vec<Message>,
}

/// One source of a tail task. Jobs on it run one at a time.
struct SourceSlot {
    state: Arc<Mutex<SourceState>>,
    inbox: mpsc::UnboundedSender<Message>,
    drain_scheduled: Arc<AtomicBool>,
}

struct TaskHandle {
    task_id: TaskId,
    owner: OwnerId,
    target: StreamId,
    control: Arc<TaskControl>,
    reports: mpsc::Sender<TailReport>,
    /// Set once the task is unregistered; later jobs do nothing.
    retired: AtomicBool,
}

impl TaskHandle {
    fn is_idle(&self) -> bool {
        self.retired.load(Ordering::Acquire) || self.control.is_stopped() || self.control.is_paused()
    }

    async fn report(&self, report: TailReport) {
        if self.reports.send(report).await.is_err() {
            debug!(owner = %self.owner, "Tail task stopped listening");
        }
    }
}

struct TailTask {
    handle: Arc<TaskHandle>,
    sources: HashMap<StreamId, SourceSlot>,
}

/// Holds back a media group at the head of a listing until two consecutive
/// listings agree on its members; items of a group can still be arriving.
pub(crate) fn hold_trailing_group(
    held: &mut Option<(MediaGroupKey, Vec<MessageId>)>,
    mut fresh: Vec<Message>,
) -> Vec<Message> {
    let Some(key) = fresh.last().and_then(|m| m.media_group.clone()) else {
        *held = None;
        return fresh;
    };

    let members: Vec<MessageId> = fresh
        .iter()
        .filter(|m| m.media_group.as_ref() == Some(&key))
        .map(|m| m.id)
        .collect();

    if held
        .as_ref()
        .is_some_and(|(k, ids)| *k == key && *ids == members)
    {
        *held = None;
        return fresh;
    }

    fresh.retain(|m| m.media_group.as_ref() != Some(&key));
    *held = Some((key, members));
    fresh
}

/// Lowest id of a group that is not ready to go out. Nothing at or above it
/// may be forwarded, or the cursor would move past the group.
///
/// Pushed group items count only between listings, since their membership
/// is judged on a listing.
pub(crate) fn waiting_group_floor(
    held: &Option<(MediaGroupKey, Vec<MessageId>)>,
    fresh: &[Message],
    listed: bool,
) -> Option<MessageId> {
    let held_floor = held.as_ref().and_then(|(_, ids)| ids.iter().min().copied());
    let pushed_floor = if listed {
        None
    } else {
        fresh
            .iter()
            .filter(|m| m.media_group.is_some())
            .map(|m| m.id)
            .min()
    };
    held_floor.into_iter().chain(pushed_floor).min()
}

/// Exclusive turn on one source of one task: list it or take pushed
/// messages, then forward what is new in ascending order.
struct SourceJob {
    task: Arc<TaskHandle>,
    state: OwnedMutexGuard<SourceState>,
    processor: Arc<UnitProcessor>,
}

impl SourceJob {
    async fn poll(mut self, fetcher: Arc<RangeFetcher>, limit: usize) {
        if self.task.is_idle() {
            return;
        }
        let stream = self.state.stream.clone();
        let listing = fetcher.recent(&stream, limit).await;
        let task_id = &self.task.task_id;

        let messages = match listing {
            Ok(messages) => {
                self.state.breaker.record_success();
                messages
            }
            Err(e) => {
                let (delay, open) = match self.state.breaker.record_failure(Instant::now()) {
                    CircuitBreakerState::RetryAfter(d) => (d, false),
                    CircuitBreakerState::Open(d) => (d, true),
                };
                let failures = self.state.breaker.consecutive_failures();
                warn!(
                    task_id = %task_id,
                    source = %stream,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    open,
                    error = %e,
                    "Tail listing failed"
                );
                self.task
                    .report(TailReport::SourceFailed {
                        source: stream,
                        error: e.to_string(),
                        failures,
                    })
                    .await;
                return;
            }
        };

        if !self.state.cursor.is_initialized() {
            let newest = messages.last().map(|m| m.id);
            self.state.cursor.initialize(newest);
            let cursor = self.state.cursor.to_state();
            info!(
                task_id = %task_id,
                source = %stream,
                last_seen_id = ?cursor.last_seen_id,
                "Tail cursor initialized"
            );
            self.task
                .report(TailReport::Initialized {
                    source: stream,
                    cursor,
                })
                .await;
        }

        self.settle(Some(messages)).await;
    }

    async fn drain(mut self, scheduled: Arc<AtomicBool>) {
        scheduled.store(false, Ordering::SeqCst);
        if self.task.is_idle() {
            return;
        }
        self.settle(None).await;
    }

    /// Merges pending and pushed messages with the listing, if any, and
    /// forwards everything that is ready.
    async fn settle(&mut self, listing: Option<Vec<Message>>) {
        let state = &mut *self.state;
        let mut candidates = std::mem::take(&mut state.pending);
        while let Ok(msg) = state.inbox.try_recv() {
            candidates.push(msg);
        }

        if !state.cursor.is_initialized() {
            let Some(first) = candidates.iter().map(|m| m.id).min() else {
                return;
            };
            state.cursor.initialize(Some(first - 1));
            let cursor = state.cursor.to_state();
            self.task
                .report(TailReport::Initialized {
                    source: state.stream.clone(),
                    cursor,
                })
                .await;
        }

        let listed = listing.is_some();
        candidates.extend(listing.unwrap_or_default());
        let fresh = state.cursor.select_new(candidates);
        let ready = if listed {
            hold_trailing_group(&mut state.held, fresh.clone())
        } else {
            fresh.clone()
        };
        let ready: Vec<Message> = match waiting_group_floor(&state.held, &fresh, listed) {
            Some(floor) => ready.into_iter().filter(|m| m.id < floor).collect(),
            None => ready,
        };

        if !ready.is_empty() {
            debug!(
                task_id = %self.task.task_id,
                source = %state.stream,
                count = ready.len(),
                waiting = fresh.len() - ready.len(),
                "New messages"
            );
            self.forward(ready).await;
        }

        let state = &mut *self.state;
        state.pending = fresh
            .into_iter()
            .filter(|m| state.cursor.is_new(m))
            .collect();
    }

    /// Stops at the first unit left unresolved; it stays pending.
    async fn forward(&mut self, ready: Vec<Message>) {
        for unit in assemble(ready).into_units() {
            if self.task.is_idle() {
                return;
            }

            let outcome = self
                .processor
                .process(
                    &unit,
                    &self.task.target,
                    &self.state.settings,
                    self.task.control.token(),
                )
                .await;
            if !outcome.is_resolved() {
                return;
            }

            self.state.cursor.mark_handled(&unit);
            let cursor = self.state.cursor.to_state();
            self.task
                .report(TailReport::Resolved {
                    source: self.state.stream.clone(),
                    first_id: unit.first_id(),
                    last_id: unit.last_id(),
                    items: unit.len(),
                    outcome,
                    cursor,
                })
                .await;
        }
    }
}

/// Polls the sources of every tail task in a round-robin, a few sources per
/// tick, and forwards what is new.
///
/// Listing and forwarding run outside the mailbox loop, a round at a time
/// over a bounded pool. A source busy with an earlier job is skipped, so
/// each source has at most one job in flight.
pub struct TailPoller {
    fetcher: Arc<RangeFetcher>,
    processor: Arc<UnitProcessor>,
    config: TailConfig,
    latch: TickLatch,
    tasks: HashMap<TaskId, TailTask>,
    ring: VecDeque<(TaskId, StreamId)>,
}

impl TailPoller {
    pub fn new(
        fetcher: Arc<RangeFetcher>,
        processor: Arc<UnitProcessor>,
        config: TailConfig,
        latch: TickLatch,
    ) -> Self {
        Self {
            fetcher,
            processor,
            config,
            latch,
            tasks: HashMap::new(),
            ring: VecDeque::new(),
        }
    }

    fn on_register(&mut self, reg: TailRegistration) {
        self.ring.retain(|(id, _)| id != &reg.task_id);
        if let Some(old) = self.tasks.remove(&reg.task_id) {
            old.handle.retired.store(true, Ordering::Release);
        }

        let capacity = self.config.recency_capacity;
        let mut sources = HashMap::new();
        for source in reg.sources {
            let cursor = match &source.cursor {
                Some(state) => TailCursor::from_state(state, capacity),
                None => TailCursor::new(capacity),
            };
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            self.ring
                .push_back((reg.task_id.clone(), source.stream.clone()));
            sources.insert(
                source.stream.clone(),
                SourceSlot {
                    state: Arc::new(Mutex::new(SourceState {
                        stream: source.stream,
                        cursor,
                        settings: source.settings,
                        breaker: CircuitBreaker::new(
                            self.config.failure_threshold,
                            self.config.poll_interval,
                            self.config.max_backoff,
                        ),
                        held: None,
                        inbox: inbox_rx,
                        pending: Vec::new(),
                    })),
                    inbox: inbox_tx,
                    drain_scheduled: Arc::new(AtomicBool::new(false)),
                },
            );
        }

        info!(
            task_id = %reg.task_id,
            owner = %reg.owner,
            sources = sources.len(),
            "Tail task registered"
        );

        self.tasks.insert(
            reg.task_id.clone(),
            TailTask {
                handle: Arc::new(TaskHandle {
                    task_id: reg.task_id,
                    owner: reg.owner,
                    target: reg.target,
                    control: reg.control,
                    reports: reg.reports,
                    retired: AtomicBool::new(false),
                }),
                sources,
            },
        );
    }

    /// Drops the task from polling. The returned future waits for the job
    /// in flight on each source, if any, and yields the final cursors.
    fn on_unregister(
        &mut self,
        task_id: &TaskId,
    ) -> BoxFuture<'static, BTreeMap<StreamId, TailCursorState>> {
        self.ring.retain(|(id, _)| id != task_id);
        let Some(task) = self.tasks.remove(task_id) else {
            return future::ready(BTreeMap::new()).boxed();
        };

        task.handle.retired.store(true, Ordering::Release);
        info!(task_id = %task_id, owner = %task.handle.owner, "Tail task unregistered");

        let states: Vec<_> = task.sources.into_values().map(|slot| slot.state).collect();
        async move {
            let mut cursors = BTreeMap::new();
            for state in states {
                let state = state.lock().await;
                cursors.insert(state.stream.clone(), state.cursor.to_state());
            }
            cursors
        }
        .boxed()
    }

    /// Next sources in ring order that are due for a listing and not busy.
    fn pick_jobs(&mut self, now: Instant) -> Vec<SourceJob> {
        let mut picked = Vec::new();
        for _ in 0..self.ring.len() {
            if picked.len() >= self.config.sources_per_tick {
                break;
            }
            let Some(entry) = self.ring.pop_front() else {
                break;
            };

            let job = self
                .tasks
                .get(&entry.0)
                .filter(|task| !task.handle.is_idle())
                .and_then(|task| {
                    let slot = task.sources.get(&entry.1)?;
                    let state = slot.state.clone().try_lock_owned().ok()?;
                    if !state.breaker.is_ready(now) {
                        return None;
                    }
                    Some(SourceJob {
                        task: task.handle.clone(),
                        state,
                        processor: self.processor.clone(),
                    })
                });
            picked.extend(job);
            self.ring.push_back(entry);
        }
        picked
    }

    /// One polling round over the next due sources, or `None` when no
    /// source is due.
    fn begin_round(&mut self) -> Option<BoxFuture<'static, ()>> {
        let jobs = self.pick_jobs(Instant::now());
        if jobs.is_empty() {
            return None;
        }

        let fetcher = self.fetcher.clone();
        let limit = self.config.recent_limit;
        let concurrency = jobs.len();
        Some(
            stream::iter(jobs)
                .map(move |job| job.poll(fetcher.clone(), limit))
                .buffer_unordered(concurrency)
                .collect::<Vec<()>>()
                .map(|_| ())
                .boxed(),
        )
    }

    /// Queues a pushed message for every task tailing its source. Returns a
    /// drain job for each source that has none scheduled yet.
    fn begin_delivery(&mut self, msg: Message) -> Vec<BoxFuture<'static, ()>> {
        let mut drains = Vec::new();
        for task in self.tasks.values() {
            if task.handle.is_idle() {
                continue;
            }
            let Some(slot) = task.sources.get(&msg.stream) else {
                continue;
            };
            if slot.inbox.send(msg.clone()).is_err() {
                continue;
            }
            if slot.drain_scheduled.swap(true, Ordering::SeqCst) {
                debug!(task_id = %task.handle.task_id, id = msg.id, "Drain already scheduled");
                continue;
            }

            let handle = task.handle.clone();
            let state = slot.state.clone();
            let scheduled = slot.drain_scheduled.clone();
            let processor = self.processor.clone();
            drains.push(
                async move {
                    let job = SourceJob {
                        task: handle,
                        state: state.lock_owned().await,
                        processor,
                    };
                    job.drain(scheduled).await;
                }
                .boxed(),
            );
        }
        drains
    }
}

#[async_trait]
impl Actor<PollerMsg> for TailPoller {
    async fn on_start(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        info!(
            actor = ctx.name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            sources_per_tick = self.config.sources_per_tick,
            "Tail poller started"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: PollerMsg, _ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            PollerMsg::Register(reg) => self.on_register(reg),
            PollerMsg::Unregister { task_id, ack } => {
                let cursors = self.on_unregister(&task_id);
                tokio::spawn(async move {
                    if ack.send(cursors.await).is_err() {
                        debug!(task_id = %task_id, "Unregister ack dropped");
                    }
                });
            }
            PollerMsg::Deliver(msg) => {
                for drain in self.begin_delivery(msg) {
                    tokio::spawn(drain);
                }
            }
            PollerMsg::Tick => {
                if let Some(round) = self.begin_round() {
                    tokio::spawn(round);
                }
                self.latch.release();
            }
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), tasks = self.tasks.len(), "Tail poller stopping");
        for task in self.tasks.values() {
            task.handle.retired.store(true, Ordering::Release);
        }
        Ok(())
    }
}
