use crate::error::CliError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{
    error::TransportError,
    transport::{SendReceipt, Transport},
};
use model::{
    core::identifiers::{MessageId, StreamId},
    records::{
        content::{GroupContent, Outgoing},
        message::{EntityInfo, Message},
    },
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::info;

/// Contents of a fixture file.
#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    /// Streams that exist but hold no messages, typically targets.
    #[serde(default)]
    streams: Vec<StreamId>,
    #[serde(default)]
    messages: Vec<Message>,
}

/// One line of the send log.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendRecord {
    pub at: DateTime<Utc>,
    pub target: StreamId,
    pub message_ids: Vec<MessageId>,
    pub text: Option<String>,
    pub media: usize,
}

/// Offline transport over a JSON fixture. Sends are appended to a
/// JSON-lines log next to the fixture.
pub struct FixtureTransport {
    streams: BTreeMap<StreamId, BTreeMap<MessageId, Message>>,
    entities: BTreeSet<StreamId>,
    log: Mutex<File>,
    log_path: PathBuf,
    next_id: AtomicI64,
}

impl FixtureTransport {
    pub async fn load(path: &Path) -> Result<Self, CliError> {
        let fixture_err = |reason: String| CliError::Fixture {
            path: path.display().to_string(),
            reason,
        };

        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| fixture_err(e.to_string()))?;
        let fixture: FixtureFile =
            serde_json::from_str(&source).map_err(|e| fixture_err(e.to_string()))?;

        let mut entities = fixture.streams.into_iter().collect::<BTreeSet<_>>();
        let mut streams: BTreeMap<StreamId, BTreeMap<MessageId, Message>> = BTreeMap::new();
        for msg in fixture.messages {
            entities.insert(msg.stream.clone());
            streams
                .entry(msg.stream.clone())
                .or_default()
                .insert(msg.id, msg);
        }

        let log_path = path.with_extension("sent.jsonl");
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| fixture_err(e.to_string()))?;

        info!(
            fixture = %path.display(),
            streams = entities.len(),
            messages = streams.values().map(BTreeMap::len).sum::<usize>(),
            "Fixture transport loaded"
        );

        Ok(Self {
            streams,
            entities,
            log: Mutex::new(log),
            log_path,
            next_id: AtomicI64::new(1),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    async fn record(
        &self,
        target: &StreamId,
        count: usize,
        text: Option<String>,
        media: usize,
    ) -> Result<SendReceipt, TransportError> {
        if !self.entities.contains(target) {
            return Err(TransportError::NotFound(target.to_string()));
        }

        let first = self.next_id.fetch_add(count.max(1) as i64, Ordering::SeqCst);
        let message_ids = (first..first + count.max(1) as i64).collect::<Vec<_>>();
        let line = SendRecord {
            at: Utc::now(),
            target: target.clone(),
            message_ids: message_ids.clone(),
            text,
            media,
        };
        let mut json =
            serde_json::to_string(&line).map_err(|e| TransportError::Permanent(e.to_string()))?;
        json.push('\n');

        let mut log = self.log.lock().await;
        log.write_all(json.as_bytes())
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        log.flush()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(SendReceipt { message_ids })
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn get_messages_by_ids(
        &self,
        stream: &StreamId,
        ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError> {
        let messages = self.streams.get(stream);
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
        Ok(self
            .streams
            .get(stream)
            .map(|m| m.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        target: &StreamId,
        content: &Outgoing,
    ) -> Result<SendReceipt, TransportError> {
        let media = usize::from(content.media.is_some());
        self.record(target, 1, content.text.clone(), media).await
    }

    async fn send_media_group(
        &self,
        target: &StreamId,
        content: &GroupContent,
    ) -> Result<SendReceipt, TransportError> {
        let count = content.media.len();
        self.record(target, count, content.caption.clone(), count)
            .await
    }

    async fn get_entity(&self, stream: &StreamId) -> Result<EntityInfo, TransportError> {
        if !self.entities.contains(stream) {
            return Err(TransportError::NotFound(stream.to_string()));
        }
        Ok(EntityInfo {
            id: stream.clone(),
            title: None,
        })
    }
}

/// Stand-in when no platform client is configured: every call fails as
/// unreachable, so only store-backed commands succeed.
pub struct NoTransport;

impl NoTransport {
    fn unavailable() -> TransportError {
        TransportError::Unreachable("no platform transport configured; pass --fixture".into())
    }
}

#[async_trait]
impl Transport for NoTransport {
    async fn get_messages_by_ids(
        &self,
        _stream: &StreamId,
        _ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError> {
        Err(Self::unavailable())
    }

    async fn get_recent_messages(
        &self,
        _stream: &StreamId,
        _limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        Err(Self::unavailable())
    }

    async fn send_message(
        &self,
        _target: &StreamId,
        _content: &Outgoing,
    ) -> Result<SendReceipt, TransportError> {
        Err(Self::unavailable())
    }

    async fn send_media_group(
        &self,
        _target: &StreamId,
        _content: &GroupContent,
    ) -> Result<SendReceipt, TransportError> {
        Err(Self::unavailable())
    }

    async fn get_entity(&self, _stream: &StreamId) -> Result<EntityInfo, TransportError> {
        Err(Self::unavailable())
    }
}
