use crate::records::message::{Button, Media, Message};
use serde::{Deserialize, Serialize};

/// Content of a single outbound send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outgoing {
    pub text: Option<String>,
    pub media: Option<Media>,
    pub buttons: Vec<Button>,
}

impl Outgoing {
    pub fn from_message(msg: &Message) -> Self {
        Self {
            text: msg.text.clone(),
            media: msg.media.clone(),
            buttons: msg.buttons.clone(),
        }
    }

    /// No media and no visible text: nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.media.is_none() && self.text.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

/// Content of an atomic multi-item send. The caption travels on the first item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupContent {
    pub caption: Option<String>,
    pub media: Vec<Media>,
    pub buttons: Vec<Button>,
}

impl GroupContent {
    pub fn is_empty(&self) -> bool {
        self.media.is_empty() && self.caption.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

/// Result of the content-transform stage for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome<C> {
    pub content: C,
    pub skip: bool,
}

impl<C> TransformOutcome<C> {
    pub fn send(content: C) -> Self {
        Self {
            content,
            skip: false,
        }
    }

    pub fn skip(content: C) -> Self {
        Self {
            content,
            skip: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::message::MediaKind;

    #[test]
    fn whitespace_only_text_is_empty() {
        let out = Outgoing {
            text: Some("  \n".into()),
            ..Default::default()
        };
        assert!(out.is_empty());
    }

    #[test]
    fn media_without_text_is_not_empty() {
        let out = Outgoing {
            media: Some(Media::new(MediaKind::Photo, "p1")),
            ..Default::default()
        };
        assert!(!out.is_empty());
    }
}
