use crate::{
    core::identifiers::{MediaGroupKey, MessageId},
    records::message::Message,
};

/// Items sharing one group key, ascending by id.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaGroup {
    pub key: MediaGroupKey,
    pub items: Vec<Message>,
}

impl MediaGroup {
    pub fn first_id(&self) -> MessageId {
        self.items.first().map(|m| m.id).unwrap_or_default()
    }

    pub fn last_id(&self) -> MessageId {
        self.items.last().map(|m| m.id).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The smallest thing the engine sends: one message or one whole group.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchUnit {
    Single(Message),
    Group(MediaGroup),
}

impl DispatchUnit {
    pub fn first_id(&self) -> MessageId {
        match self {
            DispatchUnit::Single(m) => m.id,
            DispatchUnit::Group(g) => g.first_id(),
        }
    }

    pub fn last_id(&self) -> MessageId {
        match self {
            DispatchUnit::Single(m) => m.id,
            DispatchUnit::Group(g) => g.last_id(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DispatchUnit::Single(_) => 1,
            DispatchUnit::Group(g) => g.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<MessageId> {
        match self {
            DispatchUnit::Single(m) => vec![m.id],
            DispatchUnit::Group(g) => g.items.iter().map(|m| m.id).collect(),
        }
    }

    pub fn group_key(&self) -> Option<&MediaGroupKey> {
        match self {
            DispatchUnit::Single(_) => None,
            DispatchUnit::Group(g) => Some(&g.key),
        }
    }
}
