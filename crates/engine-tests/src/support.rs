use async_trait::async_trait;
use engine_config::settings::EngineConfig;
use engine_core::{
    error::TransportError,
    state::sled_store::SledTaskStore,
    transport::{SendReceipt, Transport},
};
use engine_processing::transform::rules::RuleTransform;
use engine_runtime::Engine;
use model::{
    core::identifiers::{MessageId, StreamId, TaskId},
    records::{
        content::{GroupContent, Outgoing},
        message::{EntityInfo, Media, MediaKind, Message},
    },
    task::{record::TaskRecord, status::TaskStatus},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::watch, time::Instant};

pub const SOURCE: &str = "src";
pub const TARGET: &str = "dst";

/// One send that reached the target.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub at: Instant,
    pub target: StreamId,
    pub text: Option<String>,
    pub items: usize,
}

/// In-memory chat platform for end-to-end runs.
///
/// Streams can change while a task runs. Sends can be throttled or
/// rejected by text, and held at a gate to freeze a task mid-run.
pub struct SimTransport {
    streams: Mutex<BTreeMap<StreamId, BTreeMap<MessageId, Message>>>,
    calls: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<Delivered>>,
    delivered_count: watch::Sender<usize>,
    throttles: Mutex<HashMap<String, Duration>>,
    rejected: Mutex<HashSet<String>>,
    gate: watch::Sender<Option<usize>>,
}

impl SimTransport {
    pub fn new(streams: &[&str]) -> Arc<Self> {
        let map = streams
            .iter()
            .map(|s| (StreamId::from(*s), BTreeMap::new()))
            .collect();
        Arc::new(Self {
            streams: Mutex::new(map),
            calls: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            delivered_count: watch::Sender::new(0),
            throttles: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            gate: watch::Sender::new(None),
        })
    }

    pub fn post(&self, msg: Message) {
        self.streams
            .lock()
            .expect("streams lock")
            .entry(msg.stream.clone())
            .or_default()
            .insert(msg.id, msg);
    }

    /// Text messages reading `"{stream}-{id}"`.
    pub fn post_text(&self, stream: &str, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.post(Message::text(stream, id, text_of(stream, id)));
        }
    }

    pub fn post_group(&self, stream: &str, key: &str, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.post(
                Message::text(stream, id, text_of(stream, id))
                    .with_media(Media::new(MediaKind::Photo, format!("photo-{id}")))
                    .in_group(key),
            );
        }
    }

    /// The next send carrying `text` fails with a mandated wait.
    pub fn throttle_once(&self, text: &str, wait: Duration) {
        self.throttles
            .lock()
            .expect("throttles lock")
            .insert(text.to_string(), wait);
    }

    /// Every send carrying `text` is refused permanently.
    pub fn reject(&self, text: &str) {
        self.rejected
            .lock()
            .expect("rejected lock")
            .insert(text.to_string());
    }

    /// Sends beyond the first `after` wait until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self, after: usize) {
        self.gate.send_replace(Some(after));
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(None);
    }

    pub async fn wait_for_deliveries(&self, count: usize) {
        let mut rx = self.delivered_count.subscribe();
        rx.wait_for(|n| *n >= count)
            .await
            .expect("delivery counter dropped");
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().expect("delivered lock").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .map(|d| d.text.unwrap_or_default())
            .collect()
    }

    /// Instants of every platform call, sends and reads alike.
    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn note_call(&self) {
        self.calls.lock().expect("calls lock").push(Instant::now());
    }

    async fn deliver(
        &self,
        target: &StreamId,
        text: Option<String>,
        items: usize,
    ) -> Result<SendReceipt, TransportError> {
        self.note_call();

        let key = text.clone().unwrap_or_default();
        if let Some(wait) = self.throttles.lock().expect("throttles lock").remove(&key) {
            return Err(TransportError::Throttled { wait });
        }
        if self.rejected.lock().expect("rejected lock").contains(&key) {
            return Err(TransportError::Permanent(format!("rejected {key}")));
        }

        let done = *self.delivered_count.borrow();
        let mut gate = self.gate.subscribe();
        gate.wait_for(|limit| limit.is_none_or(|after| done < after))
            .await
            .expect("gate dropped");

        let mut delivered = self.delivered.lock().expect("delivered lock");
        delivered.push(Delivered {
            at: Instant::now(),
            target: target.clone(),
            text,
            items,
        });
        let count = delivered.len();
        drop(delivered);
        self.delivered_count.send_replace(count);

        Ok(SendReceipt {
            message_ids: vec![count as MessageId],
        })
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn get_messages_by_ids(
        &self,
        stream: &StreamId,
        ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError> {
        self.note_call();
        let streams = self.streams.lock().expect("streams lock");
        let messages = streams.get(stream);
        Ok(ids
            .iter()
            .map(|id| messages.and_then(|m| m.get(id)).cloned())
            .collect())
    }

    async fn get_recent_messages(
        &self,
        stream: &StreamId,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        self.note_call();
        let streams = self.streams.lock().expect("streams lock");
        Ok(streams
            .get(stream)
            .map(|m| m.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        target: &StreamId,
        content: &Outgoing,
    ) -> Result<SendReceipt, TransportError> {
        self.deliver(target, content.text.clone(), 1).await
    }

    async fn send_media_group(
        &self,
        target: &StreamId,
        content: &GroupContent,
    ) -> Result<SendReceipt, TransportError> {
        self.deliver(target, content.caption.clone(), content.media.len())
            .await
    }

    async fn get_entity(&self, stream: &StreamId) -> Result<EntityInfo, TransportError> {
        self.note_call();
        if !self.streams.lock().expect("streams lock").contains_key(stream) {
            return Err(TransportError::NotFound(stream.to_string()));
        }
        Ok(EntityInfo {
            id: stream.clone(),
            title: Some(stream.to_string()),
        })
    }
}

pub fn text_of(stream: &str, id: MessageId) -> String {
    format!("{stream}-{id}")
}

pub fn open_store(dir: &Path) -> Arc<SledTaskStore> {
    Arc::new(SledTaskStore::open(dir).expect("open sled"))
}

pub fn start_engine(
    config: EngineConfig,
    transport: Arc<SimTransport>,
    store: Arc<SledTaskStore>,
) -> Engine {
    let transform = Arc::new(RuleTransform::new(config.dispatch.caption_limit));
    Engine::start(config, transport, store, transform).expect("start engine")
}

/// Polls the task snapshot until it reaches `status`.
pub async fn wait_for_status(engine: &Engine, id: &TaskId, status: TaskStatus) -> TaskRecord {
    for _ in 0..1000 {
        let record = engine.snapshot(id).await.expect("snapshot");
        if record.status == status {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {status}");
}

/// Largest number of calls that fall inside any `window`-long span.
pub fn max_calls_in_window(calls: &[Instant], window: Duration) -> usize {
    let mut sorted = calls.to_vec();
    sorted.sort();
    let mut best = 0;
    let mut start = 0;
    for end in 0..sorted.len() {
        while sorted[end].duration_since(sorted[start]) >= window {
            start += 1;
        }
        best = best.max(end - start + 1);
    }
    best
}
