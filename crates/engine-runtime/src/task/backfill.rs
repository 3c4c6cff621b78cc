use crate::task::{RunEnd, TaskLink, TaskRun, TaskServices};
use chrono::Utc;
use engine_config::settings::transform::TransformSettings;
use engine_core::progress::estimate_total;
use engine_processing::{
    assemble::assemble,
    error::FetchError,
    fetch::{range::BatchRequest, sizing::BatchSizer},
    processor::UnitOutcome,
};
use model::{
    core::identifiers::MessageId,
    events::UnitFailed,
    records::unit::DispatchUnit,
    task::{
        record::{IdRange, TaskRecord, TaskUpdate},
        status::TaskStatus,
    },
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Copies a bounded id range from the source to the target, batch by batch.
///
/// Units are sent in ascending order of their first id. The checkpoint only
/// ever moves past ids whose unit was resolved (sent, skipped or given up
/// on), so a resumed run starts right after the last resolved id.
pub struct BackfillRunner {
    run: TaskRun,
    sizer: BatchSizer,
    settings: TransformSettings,
}

impl BackfillRunner {
    pub fn new(services: Arc<TaskServices>, record: TaskRecord, link: TaskLink) -> Self {
        let sizer = BatchSizer::new(&services.config.fetch);
        let settings = services
            .config
            .transform
            .resolve(&record.owner, &record.source);
        Self {
            run: TaskRun::new(services, record, link),
            sizer,
            settings,
        }
    }

    pub async fn run(mut self) -> TaskRecord {
        let end = self.execute().await;
        self.run.finish(end).await
    }

    async fn execute(&mut self) -> RunEnd {
        let resume = self.run.record.resume.clone();
        let note = match resume.resume_from_id.filter(|_| resume.is_resumed) {
            Some(id) => format!("resumed from {id}"),
            None => "started".to_string(),
        };
        let update = TaskUpdate::default().with_resume(resume.clone()).with_error(None);
        if let Err(e) = self
            .run
            .transition(TaskStatus::Running, update, Some(note))
            .await
        {
            return RunEnd::Failed(format!("state store: {e}"));
        }

        let streams = [self.run.record.source.clone(), self.run.record.target.clone()];
        if let Err(reason) = self.run.services.validate_entities(&streams).await {
            return RunEnd::Failed(reason);
        }

        let (start, end) = match self.resolve_range().await {
            Ok(Some(bounds)) => bounds,
            Ok(None) => {
                info!(task_id = %self.run.record.id, "Nothing to copy in range");
                return RunEnd::Completed;
            }
            Err(e) => return RunEnd::Failed(e.to_string()),
        };

        let mut from = match resume.resume_from_id.filter(|_| resume.is_resumed) {
            Some(id) => id.max(start),
            None => start,
        };

        info!(
            task_id = %self.run.record.id,
            source = %self.run.record.source,
            target = %self.run.record.target,
            from,
            end,
            "Backfill started"
        );

        while from <= end {
            if !self.run.gate().await {
                return RunEnd::Stopped(self.run.stop_reason());
            }

            match self.run_batch(from, end).await {
                Ok(Some(next)) => from = next,
                Ok(None) => return RunEnd::Stopped(self.run.stop_reason()),
                Err(e) => return RunEnd::Failed(e.to_string()),
            }
        }

        RunEnd::Completed
    }

    /// Fetches one batch and resolves all its units. Returns the first id of
    /// the next batch, or `None` when a stop interrupted the batch.
    ///
    /// Ids outside `[from, end]` are never read: earlier ids are already
    /// resolved or lie before the range, and a group running past `end` is
    /// cut there.
    async fn run_batch(
        &mut self,
        from: MessageId,
        end: MessageId,
    ) -> Result<Option<MessageId>, FetchError> {
        let round = Instant::now();
        let source = self.run.record.source.clone();
        let req = BatchRequest {
            stream: &source,
            from,
            to: end,
            size: self.sizer.current(),
            floor: Some(from),
        };

        let services = self.run.services.clone();
        let control = self.run.link.control.clone();
        let batch = tokio::select! {
            biased;
            _ = control.token().cancelled() => return Ok(None),
            batch = services.fetcher.fetch_batch(&req) => batch?,
        };

        let span_end = batch.span_end.min(end);
        let mut next_unexamined = batch.span_start.max(from);
        let in_range: Vec<_> = batch
            .messages
            .into_iter()
            .filter(|m| (from..=span_end).contains(&m.id))
            .collect();
        let units = assemble(in_range).into_units();

        for unit in &units {
            if !self.run.gate().await {
                return Ok(None);
            }

            let outcome = services
                .processor
                .process(unit, &self.run.record.target, &self.settings, control.token())
                .await;
            if outcome == UnitOutcome::Cancelled {
                return Ok(None);
            }

            let examined = (unit.last_id() - next_unexamined + 1).max(0) as u64;
            let missing = examined.saturating_sub(unit.len() as u64);
            self.account(unit, &outcome, missing).await;
            next_unexamined = next_unexamined.max(unit.last_id() + 1);
            self.advance(unit.last_id());
            self.run.checkpoint().await;
        }

        let trailing = (span_end - next_unexamined + 1).max(0) as u64;
        self.run.record.progress.processed_count += trailing;
        self.advance(span_end);
        self.run.checkpoint().await;

        if let Some(size) = self.sizer.record(round.elapsed()) {
            debug!(task_id = %self.run.record.id, size, "Batch size adjusted");
        }

        Ok(Some(span_end + 1))
    }

    async fn account(&mut self, unit: &DispatchUnit, outcome: &UnitOutcome, missing: u64) {
        let items = unit.len() as u64;
        let progress = &mut self.run.record.progress;
        progress.processed_count += missing;

        match outcome {
            UnitOutcome::Sent { items: sent } => {
                progress.processed_count += items;
                progress.sent_items += *sent as u64;
                progress.sent_units += 1;
            }
            UnitOutcome::Skipped => {
                progress.processed_count += items;
                progress.skipped_count += items;
            }
            UnitOutcome::Empty => progress.processed_count += items,
            UnitOutcome::Failed { reason } => {
                progress.failed_count += items;
                self.run
                    .services
                    .events
                    .publish(UnitFailed {
                        task_id: self.run.record.id.clone(),
                        source: self.run.record.source.clone(),
                        first_id: unit.first_id(),
                        last_id: unit.last_id(),
                        reason: reason.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            UnitOutcome::Cancelled => {}
        }
    }

    fn advance(&mut self, id: MessageId) {
        let progress = &mut self.run.record.progress;
        progress.current_id = progress.current_id.max(Some(id));
        progress.last_checkpoint_id = progress.last_checkpoint_id.max(Some(id));
    }

    /// Bounds of the range to copy. An open end is pinned to the newest
    /// message at first start and stored, so resumes see the same range.
    async fn resolve_range(&mut self) -> Result<Option<(MessageId, MessageId)>, FetchError> {
        let range = self
            .run
            .record
            .range()
            .unwrap_or_else(|| IdRange::new(1, None));
        if let Some(end) = range.end_id {
            return Ok((range.start_id <= end).then_some((range.start_id, end)));
        }

        let limit = self.run.services.config.fetch.open_range_limit;
        let recent = self
            .run
            .services
            .fetcher
            .recent(&self.run.record.source, limit)
            .await?;
        let Some(newest) = recent.last().map(|m| m.id) else {
            return Ok(None);
        };
        if newest < range.start_id {
            return Ok(None);
        }

        let resolved = IdRange::bounded(range.start_id, newest);
        self.run.record.progress.total = estimate_total(&resolved);
        let update = TaskUpdate::progress(self.run.record.progress.clone()).with_range(resolved);
        self.run.record.apply(&update);
        info!(
            task_id = %self.run.record.id,
            start_id = range.start_id,
            end_id = newest,
            "Open range resolved"
        );

        if let Err(e) = self
            .run
            .transition(TaskStatus::Running, update, None)
            .await
        {
            warn!(task_id = %self.run.record.id, error = %e, "Failed to store resolved range");
        }

        Ok(Some((range.start_id, newest)))
    }
}
