use crate::{error::FetchError, retry::classify_transport_error};
use engine_config::settings::FetchConfig;
use engine_core::{
    error::TransportError,
    metrics::Metrics,
    rate::RateController,
    retry::{RetryDisposition, RetryPolicy},
    transport::Transport,
};
use model::{
    core::identifiers::{MediaGroupKey, MessageId, StreamId},
    records::message::Message,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// One nominal batch to read.
#[derive(Debug, Clone)]
pub struct BatchRequest<'a> {
    pub stream: &'a StreamId,
    pub from: MessageId,
    /// Last id of the task range. Neither the nominal window nor a forward
    /// group probe passes it.
    pub to: MessageId,
    pub size: usize,
    /// Lowest id a backward group probe may reach. `None` allows the full
    /// probe budget below `from`.
    pub floor: Option<MessageId>,
}

/// Existing messages of one batch plus the id span it accounts for.
///
/// The span can be wider than the nominal window when a media group was
/// completed across an edge. Every id in the span not present in `messages`
/// is missing at the source.
#[derive(Debug, Clone)]
pub struct FetchedBatch {
    pub messages: Vec<Message>,
    pub span_start: MessageId,
    pub span_end: MessageId,
    pub elapsed: Duration,
}

impl FetchedBatch {
    pub fn span_len(&self) -> u64 {
        (self.span_end - self.span_start + 1).max(0) as u64
    }

    pub fn missing(&self) -> u64 {
        self.span_len().saturating_sub(self.messages.len() as u64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    lo: MessageId,
    hi: MessageId,
    verify_gap: bool,
    retried: bool,
}

impl Span {
    fn len(&self) -> usize {
        (self.hi - self.lo + 1) as usize
    }
}

/// Reads id ranges in bounded windows, never returning a media group cut at
/// a batch edge.
pub struct RangeFetcher {
    transport: Arc<dyn Transport>,
    rate: Arc<RateController>,
    config: FetchConfig,
    retry: RetryPolicy,
    metrics: Metrics,
}

impl RangeFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        rate: Arc<RateController>,
        config: FetchConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            transport,
            rate,
            config,
            retry: RetryPolicy::default(),
            metrics,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches `[from, min(from + size - 1, to)]`, extended across either edge
    /// as far as needed to keep an edge media group whole. Extensions stay
    /// within `[floor, to]`.
    pub async fn fetch_batch(&self, req: &BatchRequest<'_>) -> Result<FetchedBatch, FetchError> {
        let started = Instant::now();

        if req.from > req.to || req.size == 0 {
            return Ok(FetchedBatch {
                messages: Vec::new(),
                span_start: req.from,
                span_end: req.from - 1,
                elapsed: started.elapsed(),
            });
        }

        let end = (req.from + req.size as i64 - 1).min(req.to);
        let mut found = self.fetch_window(req.stream, req.from, end).await?;
        let mut span_start = req.from;
        let mut span_end = end;

        let tail_key = found
            .values()
            .next_back()
            .and_then(|m| m.media_group.clone());
        if let Some(key) = tail_key
            && end < req.to
            && let Some(last) = self
                .probe_forward(req.stream, &key, end, req.to, &mut found)
                .await
        {
            span_end = span_end.max(last);
        }

        let head_key = found.values().next().and_then(|m| m.media_group.clone());
        if let Some(key) = head_key {
            let budget_floor = (req.from - self.config.probe_limit as i64).max(1);
            let lower = req.floor.map_or(budget_floor, |f| f.max(budget_floor));
            if lower < req.from
                && let Some(first) = self
                    .probe_backward(req.stream, &key, lower, req.from - 1, &mut found)
                    .await
            {
                span_start = span_start.min(first);
            }
        }

        let messages: Vec<Message> = found.into_values().collect();
        let elapsed = started.elapsed();
        self.metrics.record_fetch(messages.len() as u64);

        info!(
            stream = %req.stream,
            span_start,
            span_end,
            count = messages.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Fetched batch"
        );

        Ok(FetchedBatch {
            messages,
            span_start,
            span_end,
            elapsed,
        })
    }

    /// Newest messages of a stream, returned in ascending id order.
    pub async fn recent(&self, stream: &StreamId, limit: usize) -> Result<Vec<Message>, FetchError> {
        let result = self
            .retry
            .run(
                || async move {
                    self.rate.acquire().await;
                    let result = match timeout(
                        self.config.fetch_timeout,
                        self.transport.get_recent_messages(stream, limit),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout),
                    };
                    if let Err(TransportError::Throttled { wait }) = &result {
                        self.on_throttled(*wait).await;
                    }
                    result
                },
                |err| match classify_transport_error(err) {
                    // The controller already holds the cool-down.
                    RetryDisposition::WaitThenRetry(_) => {
                        RetryDisposition::WaitThenRetry(Duration::ZERO)
                    }
                    other => other,
                },
            )
            .await;

        let mut messages = result.map_err(|e| FetchError::Transport {
            stream: stream.clone(),
            source: e.into_inner(),
        })?;
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        Ok(messages)
    }

    async fn on_throttled(&self, wait: Duration) {
        self.rate.report_throttled(wait).await;
        self.metrics.record_throttle(wait.as_secs());
    }

    /// Reads `[lo, hi]` in call-sized chunks. Transient failures are retried
    /// on halves down to `bisect_chunk`; mostly empty wide chunks are read
    /// again in `bisect_chunk` pieces before their gap is believed.
    async fn fetch_window(
        &self,
        stream: &StreamId,
        lo: MessageId,
        hi: MessageId,
    ) -> Result<BTreeMap<MessageId, Message>, FetchError> {
        let mut found = BTreeMap::new();
        let mut pending: Vec<Span> = chunks(lo, hi, self.config.max_ids_per_call)
            .into_iter()
            .rev()
            .map(|(lo, hi)| Span {
                lo,
                hi,
                verify_gap: true,
                retried: false,
            })
            .collect();

        while let Some(span) = pending.pop() {
            let len = span.len();
            match self.call_ids(stream, span.lo, span.hi).await {
                Ok(slots) => {
                    let missing = len - slots.len();
                    let suspicious = span.verify_gap
                        && len >= self.config.bisect_span
                        && missing as f64 > self.config.gap_ratio * len as f64;
                    found.extend(slots);

                    if suspicious {
                        debug!(
                            stream = %stream,
                            lo = span.lo,
                            hi = span.hi,
                            missing,
                            "Wide gap in batch, re-reading in smaller chunks"
                        );
                        for (lo, hi) in chunks(span.lo, span.hi, self.config.bisect_chunk)
                            .into_iter()
                            .rev()
                        {
                            pending.push(Span {
                                lo,
                                hi,
                                verify_gap: false,
                                retried: false,
                            });
                        }
                    }
                }
                Err(err) if classify_transport_error(&err) == RetryDisposition::Retry => {
                    self.metrics.increment_retries();
                    if len > self.config.bisect_chunk {
                        let mid = span.lo + (len / 2) as i64 - 1;
                        pending.push(Span {
                            lo: mid + 1,
                            verify_gap: false,
                            ..span
                        });
                        pending.push(Span {
                            hi: mid,
                            verify_gap: false,
                            ..span
                        });
                    } else if !span.retried {
                        sleep(self.retry.backoff_delay(0)).await;
                        pending.push(Span {
                            retried: true,
                            ..span
                        });
                    } else {
                        warn!(
                            stream = %stream,
                            lo = span.lo,
                            hi = span.hi,
                            error = %err,
                            "Sub-range unreadable, treating it as empty"
                        );
                    }
                }
                Err(err) => {
                    return Err(FetchError::Transport {
                        stream: stream.clone(),
                        source: err,
                    });
                }
            }
        }

        Ok(found)
    }

    /// One `get_messages_by_ids` call under the rate limit. Throttles are
    /// honored and the same call repeated.
    async fn call_ids(
        &self,
        stream: &StreamId,
        lo: MessageId,
        hi: MessageId,
    ) -> Result<BTreeMap<MessageId, Message>, TransportError> {
        let ids: Vec<MessageId> = (lo..=hi).collect();

        loop {
            self.rate.acquire().await;
            let result = match timeout(
                self.config.fetch_timeout,
                self.transport.get_messages_by_ids(stream, &ids),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match result {
                Ok(slots) => {
                    return Ok(slots
                        .into_iter()
                        .flatten()
                        .filter(|m| (lo..=hi).contains(&m.id))
                        .map(|m| (m.id, m))
                        .collect());
                }
                Err(err) => match classify_transport_error(&err) {
                    RetryDisposition::WaitThenRetry(wait) => self.on_throttled(wait).await,
                    _ => return Err(err),
                },
            }
        }
    }

    /// Like [`call_ids`](Self::call_ids) with one retry; a probe that still
    /// fails gives up instead of failing the batch.
    async fn probe_call(
        &self,
        stream: &StreamId,
        lo: MessageId,
        hi: MessageId,
    ) -> Option<BTreeMap<MessageId, Message>> {
        for attempt in 0..2 {
            match self.call_ids(stream, lo, hi).await {
                Ok(slots) => return Some(slots),
                Err(err)
                    if attempt == 0
                        && classify_transport_error(&err) == RetryDisposition::Retry =>
                {
                    sleep(self.retry.backoff_delay(0)).await;
                }
                Err(err) => {
                    warn!(
                        stream = %stream,
                        lo,
                        hi,
                        error = %err,
                        "Group probe failed, edge group may be incomplete"
                    );
                    return None;
                }
            }
        }
        None
    }

    /// Follows `key` upward from `end + 1`, never past `ceiling`. Returns the
    /// last member id added.
    async fn probe_forward(
        &self,
        stream: &StreamId,
        key: &MediaGroupKey,
        end: MessageId,
        ceiling: MessageId,
        found: &mut BTreeMap<MessageId, Message>,
    ) -> Option<MessageId> {
        let limit = (end + self.config.probe_limit as i64).min(ceiling);
        let step = self.config.probe_step.max(1) as i64;
        let mut next = end + 1;
        let mut last_member = None;

        while next <= limit {
            let hi = (next + step - 1).min(limit);
            let Some(mut slots) = self.probe_call(stream, next, hi).await else {
                return last_member;
            };

            for id in next..=hi {
                match slots.remove(&id) {
                    Some(msg) if msg.media_group.as_ref() == Some(key) => {
                        found.insert(id, msg);
                        last_member = Some(id);
                    }
                    Some(_) => return last_member,
                    None => {}
                }
            }
            next = hi + 1;
        }

        if last_member.is_some() {
            debug!(stream = %stream, group = %key, "Group probe budget exhausted");
        }
        last_member
    }

    /// Follows `key` downward from `start` to `lower`. Returns the first
    /// member id added.
    async fn probe_backward(
        &self,
        stream: &StreamId,
        key: &MediaGroupKey,
        lower: MessageId,
        start: MessageId,
        found: &mut BTreeMap<MessageId, Message>,
    ) -> Option<MessageId> {
        let step = self.config.probe_step.max(1) as i64;
        let mut next = start;
        let mut first_member = None;

        while next >= lower {
            let lo = (next - step + 1).max(lower);
            let Some(mut slots) = self.probe_call(stream, lo, next).await else {
                return first_member;
            };

            for id in (lo..=next).rev() {
                match slots.remove(&id) {
                    Some(msg) if msg.media_group.as_ref() == Some(key) => {
                        found.insert(id, msg);
                        first_member = Some(id);
                    }
                    Some(_) => return first_member,
                    None => {}
                }
            }
            next = lo - 1;
        }

        first_member
    }
}

fn chunks(lo: MessageId, hi: MessageId, size: usize) -> Vec<(MessageId, MessageId)> {
    let size = size.max(1) as i64;
    let mut out = Vec::new();
    let mut start = lo;
    while start <= hi {
        let end = (start + size - 1).min(hi);
        out.push((start, end));
        start = end + 1;
    }
    out
}
