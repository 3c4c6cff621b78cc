use async_trait::async_trait;
use engine_core::{
    error::TransportError,
    transport::{SendReceipt, Transport},
};
use model::{
    core::identifiers::{MessageId, StreamId},
    records::{
        content::{GroupContent, Outgoing},
        message::{EntityInfo, Media, MediaKind, Message},
    },
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Item(Option<String>),
    Group(usize),
}

/// Single-stream in-memory transport with scripted failures.
#[derive(Default)]
pub(crate) struct MockTransport {
    messages: BTreeMap<MessageId, Message>,
    pub fetch_errors: Mutex<VecDeque<TransportError>>,
    pub send_errors: Mutex<VecDeque<TransportError>>,
    /// Calls asking for at least this many ids come back empty.
    pub blind_above: Option<usize>,
    pub id_calls: Mutex<Vec<(MessageId, MessageId)>>,
    pub sent: Mutex<Vec<Sent>>,
}

impl MockTransport {
    pub fn with_ids(ids: impl IntoIterator<Item = MessageId>) -> Self {
        let mut t = Self::default();
        for id in ids {
            t.messages
                .insert(id, Message::text("src", id, format!("msg-{id}")));
        }
        t
    }

    pub fn group(mut self, key: &str, ids: impl IntoIterator<Item = MessageId>) -> Self {
        for id in ids {
            let msg = Message::text("src", id, format!("msg-{id}"))
                .with_media(Media::new(MediaKind::Photo, format!("photo-{id}")))
                .in_group(key);
            self.messages.insert(id, msg);
        }
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_messages_by_ids(
        &self,
        _stream: &StreamId,
        ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError> {
        if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
            self.id_calls.lock().unwrap().push((*first, *last));
        }
        if let Some(err) = self.fetch_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.blind_above.is_some_and(|n| ids.len() >= n) {
            return Ok(vec![None; ids.len()]);
        }
        Ok(ids.iter().map(|id| self.messages.get(id).cloned()).collect())
    }

    async fn get_recent_messages(
        &self,
        _stream: &StreamId,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        if let Some(err) = self.fetch_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.messages.values().rev().take(limit).cloned().collect())
    }

    async fn send_message(
        &self,
        _target: &StreamId,
        content: &Outgoing,
    ) -> Result<SendReceipt, TransportError> {
        if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(Sent::Item(content.text.clone()));
        Ok(SendReceipt::default())
    }

    async fn send_media_group(
        &self,
        _target: &StreamId,
        content: &GroupContent,
    ) -> Result<SendReceipt, TransportError> {
        if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(Sent::Group(content.media.len()));
        Ok(SendReceipt::default())
    }

    async fn get_entity(&self, stream: &StreamId) -> Result<EntityInfo, TransportError> {
        Ok(EntityInfo {
            id: stream.clone(),
            title: None,
        })
    }
}
