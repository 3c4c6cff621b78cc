use crate::core::identifiers::{MediaGroupKey, MessageId, StreamId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Animation,
    Voice,
    Sticker,
}

/// Reference to an attachment already hosted by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub file_ref: String,
}

impl Media {
    pub fn new(kind: MediaKind, file_ref: impl Into<String>) -> Self {
        Self {
            kind,
            file_ref: file_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub url: String,
}

/// A raw item read from a source stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub stream: StreamId,
    #[serde(default)]
    pub media_group: Option<MediaGroupKey>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<Media>,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn text(stream: impl Into<StreamId>, id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            stream: stream.into(),
            media_group: None,
            text: Some(text.into()),
            media: None,
            buttons: Vec::new(),
            posted_at: None,
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media = Some(media);
        self
    }

    pub fn in_group(mut self, key: impl Into<MediaGroupKey>) -> Self {
        self.media_group = Some(key.into());
        self
    }

    pub fn group_key(&self) -> Option<&MediaGroupKey> {
        self.media_group.as_ref()
    }
}

/// What the platform reports about a stream when it is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: StreamId,
    #[serde(default)]
    pub title: Option<String>,
}
