use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    messages_fetched: AtomicU64,
    batches_fetched: AtomicU64,
    items_sent: AtomicU64,
    units_sent: AtomicU64,
    units_skipped: AtomicU64,
    units_failed: AtomicU64,
    retry_count: AtomicU64,
    throttle_count: AtomicU64,
    throttle_wait_secs: AtomicU64,
    checkpoints_written: AtomicU64,
}

/// Engine-wide counters, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_fetched: u64,
    pub batches_fetched: u64,
    pub items_sent: u64,
    pub units_sent: u64,
    pub units_skipped: u64,
    pub units_failed: u64,
    pub retry_count: u64,
    pub throttle_count: u64,
    pub throttle_wait_secs: u64,
    pub checkpoints_written: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn record_fetch(&self, messages: u64) {
        self.inner
            .messages_fetched
            .fetch_add(messages, Ordering::Relaxed);
        self.inner.batches_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, items: u64) {
        self.inner.items_sent.fetch_add(items, Ordering::Relaxed);
        self.inner.units_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self) {
        self.inner.units_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failures(&self) {
        self.inner.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self, wait_secs: u64) {
        self.inner.throttle_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .throttle_wait_secs
            .fetch_add(wait_secs, Ordering::Relaxed);
    }

    pub fn increment_checkpoints(&self) {
        self.inner
            .checkpoints_written
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_fetched: self.inner.messages_fetched.load(Ordering::Relaxed),
            batches_fetched: self.inner.batches_fetched.load(Ordering::Relaxed),
            items_sent: self.inner.items_sent.load(Ordering::Relaxed),
            units_sent: self.inner.units_sent.load(Ordering::Relaxed),
            units_skipped: self.inner.units_skipped.load(Ordering::Relaxed),
            units_failed: self.inner.units_failed.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            throttle_count: self.inner.throttle_count.load(Ordering::Relaxed),
            throttle_wait_secs: self.inner.throttle_wait_secs.load(Ordering::Relaxed),
            checkpoints_written: self.inner.checkpoints_written.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
