use crate::{
    actor::ActorRef,
    tail::messages::{PollerMsg, TailRegistration, TailReport, TailSource},
    task::{RunEnd, TaskLink, TaskRun, TaskServices},
};
use chrono::Utc;
use engine_processing::processor::UnitOutcome;
use model::{
    events::UnitFailed,
    task::{
        record::{TaskRecord, TaskUpdate},
        status::TaskStatus,
    },
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

const REPORT_BUFFER: usize = 256;

/// Keeps a tail task's record in step with what the poller forwards.
///
/// The poller does the listing and sending; this runner owns the task's
/// lifecycle and is the only writer of its progress and cursors.
pub struct TailRunner {
    run: TaskRun,
    poller: ActorRef<PollerMsg>,
}

impl TailRunner {
    pub fn new(
        services: Arc<TaskServices>,
        record: TaskRecord,
        link: TaskLink,
        poller: ActorRef<PollerMsg>,
    ) -> Self {
        Self {
            run: TaskRun::new(services, record, link),
            poller,
        }
    }

    pub async fn run(mut self) -> TaskRecord {
        let end = self.execute().await;
        self.run.finish(end).await
    }

    async fn execute(&mut self) -> RunEnd {
        let note = if self.run.record.resume.is_resumed {
            "resumed"
        } else {
            "started"
        };
        let update = TaskUpdate::default()
            .with_resume(self.run.record.resume.clone())
            .with_error(None);
        if let Err(e) = self
            .run
            .transition(TaskStatus::Running, update, Some(note.into()))
            .await
        {
            return RunEnd::Failed(format!("state store: {e}"));
        }

        let mut streams = self.run.record.sources();
        streams.push(self.run.record.target.clone());
        if let Err(reason) = self.run.services.validate_entities(&streams).await {
            return RunEnd::Failed(reason);
        }

        let (reports_tx, mut reports) = mpsc::channel(REPORT_BUFFER);
        if let Err(e) = self
            .poller
            .send(PollerMsg::Register(self.registration(reports_tx)))
            .await
        {
            return RunEnd::Failed(format!("tail poller unavailable: {e}"));
        }

        info!(
            task_id = %self.run.record.id,
            sources = self.run.record.sources().len(),
            target = %self.run.record.target,
            "Tailing started"
        );

        let control = self.run.link.control.clone();
        let mut paused = control.watch_paused();
        loop {
            tokio::select! {
                biased;
                _ = control.token().cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_paused = *paused.borrow_and_update();
                    self.on_pause_changed(now_paused).await;
                }
                report = reports.recv() => match report {
                    Some(report) => self.apply(report).await,
                    None => break,
                },
            }
        }

        self.detach(reports).await;
        RunEnd::Stopped(self.run.stop_reason())
    }

    fn registration(&self, reports: mpsc::Sender<TailReport>) -> TailRegistration {
        let record = &self.run.record;
        let sources = record
            .sources()
            .into_iter()
            .map(|stream| TailSource {
                cursor: record.tail_cursors.get(&stream).cloned(),
                settings: self.run.services.config.transform.resolve(&record.owner, &stream),
                stream,
            })
            .collect();

        TailRegistration {
            task_id: record.id.clone(),
            owner: record.owner.clone(),
            target: record.target.clone(),
            sources,
            control: self.run.link.control.clone(),
            reports,
        }
    }

    /// Unregisters from the poller, applying every report it sent before
    /// letting go, then adopts its final cursors.
    async fn detach(&mut self, mut reports: mpsc::Receiver<TailReport>) {
        let (ack_tx, mut ack) = oneshot::channel();
        let msg = PollerMsg::Unregister {
            task_id: self.run.record.id.clone(),
            ack: ack_tx,
        };
        if let Err(e) = self.poller.send(msg).await {
            error!(task_id = %self.run.record.id, error = %e, "Failed to unregister tail task");
            return;
        }

        let cursors = loop {
            tokio::select! {
                biased;
                report = reports.recv() => match report {
                    Some(report) => self.apply(report).await,
                    None => break (&mut ack).await.ok(),
                },
                cursors = &mut ack => break cursors.ok(),
            }
        };
        while let Ok(report) = reports.try_recv() {
            self.apply(report).await;
        }

        if let Some(cursors) = cursors {
            self.run.record.tail_cursors.extend(cursors);
        }
    }

    async fn on_pause_changed(&mut self, paused: bool) {
        let (to, note) = if paused {
            (TaskStatus::Paused, None)
        } else {
            (TaskStatus::Running, Some("resumed".to_string()))
        };
        if let Err(e) = self.run.transition(to, TaskUpdate::default(), note).await {
            error!(task_id = %self.run.record.id, error = %e, "Failed to persist status change");
        }
    }

    async fn apply(&mut self, report: TailReport) {
        match report {
            TailReport::Initialized { source, cursor } => {
                self.run.record.tail_cursors.insert(source, cursor);
            }
            TailReport::Resolved {
                source,
                first_id,
                last_id,
                items,
                outcome,
                cursor,
            } => {
                let items = items as u64;
                let progress = &mut self.run.record.progress;
                let stats = progress.by_source.entry(source.clone()).or_default();
                match &outcome {
                    UnitOutcome::Sent { items: sent } => {
                        progress.processed_count += items;
                        progress.sent_items += *sent as u64;
                        progress.sent_units += 1;
                        stats.processed += items;
                        stats.sent_items += *sent as u64;
                    }
                    UnitOutcome::Skipped => {
                        progress.processed_count += items;
                        progress.skipped_count += items;
                        stats.processed += items;
                        stats.skipped += items;
                    }
                    UnitOutcome::Empty => {
                        progress.processed_count += items;
                        stats.processed += items;
                    }
                    UnitOutcome::Failed { .. } => {
                        progress.failed_count += items;
                        stats.failed += items;
                    }
                    UnitOutcome::Cancelled => {}
                }
                if source == self.run.record.source {
                    progress.current_id = progress.current_id.max(Some(last_id));
                    progress.last_checkpoint_id = progress.last_checkpoint_id.max(Some(last_id));
                }

                if let UnitOutcome::Failed { reason } = outcome {
                    self.run
                        .services
                        .events
                        .publish(UnitFailed {
                            task_id: self.run.record.id.clone(),
                            source: source.clone(),
                            first_id,
                            last_id,
                            reason,
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                self.run.record.tail_cursors.insert(source, cursor);
            }
            TailReport::SourceFailed {
                source,
                error,
                failures,
            } => {
                debug!(
                    task_id = %self.run.record.id,
                    source = %source,
                    failures,
                    error = %error,
                    "Source listing failed"
                );
                return;
            }
        }

        self.run.checkpoint().await;
    }
}
