use crate::task::TaskServices;
use async_trait::async_trait;
use engine_config::settings::EngineConfig;
use engine_core::{
    error::{StoreError, TransportError},
    event_bus::bus::EventBus,
    metrics::Metrics,
    rate::RateController,
    state::TaskStore,
    transport::{SendReceipt, Transport},
};
use engine_processing::{
    dispatch::Dispatcher, fetch::range::RangeFetcher, processor::UnitProcessor,
    transform::rules::RuleTransform,
};
use model::{
    core::identifiers::{MessageId, OwnerId, StreamId, TaskId},
    records::{
        content::{GroupContent, Outgoing},
        message::{EntityInfo, Media, MediaKind, Message},
    },
    task::{
        journal::JournalEntry,
        record::{TaskRecord, TaskUpdate},
    },
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
};

/// One send observed at the target: the text of a single item, or the
/// caption and size of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Item(Option<String>),
    Group(Option<String>, usize),
}

/// Multi-stream in-memory platform whose content can change during a test.
#[derive(Default)]
pub struct ScriptedTransport {
    streams: Mutex<BTreeMap<StreamId, BTreeMap<MessageId, Message>>>,
    listing_errors: Mutex<VecDeque<TransportError>>,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    pub fn post(&self, msg: Message) {
        self.streams
            .lock()
            .unwrap()
            .entry(msg.stream.clone())
            .or_default()
            .insert(msg.id, msg);
    }

    pub fn post_text(&self, stream: &str, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.post(Message::text(stream, id, format!("{stream}-{id}")));
        }
    }

    pub fn post_group(&self, stream: &str, key: &str, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            self.post(
                Message::text(stream, id, format!("{stream}-{id}"))
                    .with_media(Media::new(MediaKind::Photo, format!("photo-{id}")))
                    .in_group(key),
            );
        }
    }

    pub fn fail_next_listing(&self, err: TransportError) {
        self.listing_errors.lock().unwrap().push_back(err);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_messages_by_ids(
        &self,
        stream: &StreamId,
        ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError> {
        let streams = self.streams.lock().unwrap();
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
        if let Some(err) = self.listing_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let streams = self.streams.lock().unwrap();
        Ok(streams
            .get(stream)
            .map(|m| m.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        _target: &StreamId,
        content: &Outgoing,
    ) -> Result<SendReceipt, TransportError> {
        self.sent.lock().unwrap().push(Sent::Item(content.text.clone()));
        Ok(SendReceipt::default())
    }

    async fn send_media_group(
        &self,
        _target: &StreamId,
        content: &GroupContent,
    ) -> Result<SendReceipt, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Group(content.caption.clone(), content.media.len()));
        Ok(SendReceipt::default())
    }

    async fn get_entity(&self, stream: &StreamId) -> Result<EntityInfo, TransportError> {
        if stream.as_str().starts_with("missing") {
            return Err(TransportError::NotFound(stream.to_string()));
        }
        Ok(EntityInfo {
            id: stream.clone(),
            title: Some(stream.to_string()),
        })
    }
}

/// Wires task services over the given transport and store.
pub fn services(
    transport: Arc<dyn Transport>,
    store: Arc<dyn TaskStore>,
    config: EngineConfig,
) -> Arc<TaskServices> {
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
    let processor = Arc::new(UnitProcessor::new(
        Arc::new(RuleTransform::new(config.dispatch.caption_limit)),
        dispatcher,
        metrics.clone(),
    ));

    Arc::new(TaskServices {
        store,
        transport,
        rate,
        fetcher,
        processor,
        config: Arc::new(config),
        events,
        metrics,
    })
}

/// In-memory task store for unit tests.
#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<TaskId, TaskRecord>>,
    journal: Mutex<Vec<JournalEntry>>,
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.clone()));
        }
        tasks.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_task_progress(
        &self,
        id: &TaskId,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        let record = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        record.apply(&update);
        Ok(record.clone())
    }

    async fn load_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.tasks.lock().unwrap().get(id).cloned())
    }

    async fn list_active_tasks(&self, owner: &OwnerId) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| &t.owner == owner && !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, owner: Option<&OwnerId>) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| owner.is_none_or(|o| &t.owner == o))
            .cloned()
            .collect())
    }

    async fn append_journal(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.journal.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn task_history(&self, id: &TaskId) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self
            .journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.task_id == id)
            .cloned()
            .collect())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        self.tasks
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        self.journal.lock().unwrap().retain(|e| &e.task_id != id);
        Ok(())
    }
}
