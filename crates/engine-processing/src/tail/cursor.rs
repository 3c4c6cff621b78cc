use model::{
    core::identifiers::{MediaGroupKey, MessageId},
    records::{message::Message, unit::DispatchUnit},
    task::record::TailCursorState,
};
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    hash::Hash,
};

/// Insertion-ordered set that forgets its oldest entry beyond `capacity`.
#[derive(Debug, Clone)]
pub struct RecencySet<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> RecencySet<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.members.contains(key)
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if !self.members.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

/// Per-source position of a tailing task.
///
/// `last_seen_id` only grows. It and the recency sets move only through
/// [`mark_handled`](Self::mark_handled), after a unit has been resolved.
#[derive(Debug, Clone)]
pub struct TailCursor {
    last_seen_id: Option<MessageId>,
    ids: RecencySet<MessageId>,
    groups: RecencySet<MediaGroupKey>,
}

impl TailCursor {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_seen_id: None,
            ids: RecencySet::new(capacity),
            groups: RecencySet::new(capacity),
        }
    }

    pub fn from_state(state: &TailCursorState, capacity: usize) -> Self {
        let mut cursor = Self::new(capacity);
        cursor.last_seen_id = state.last_seen_id;
        for id in &state.recent_ids {
            cursor.ids.insert(*id);
        }
        for key in &state.recent_groups {
            cursor.groups.insert(key.clone());
        }
        cursor
    }

    pub fn to_state(&self) -> TailCursorState {
        TailCursorState {
            last_seen_id: self.last_seen_id,
            recent_ids: self.ids.iter().copied().collect(),
            recent_groups: self.groups.iter().cloned().collect(),
        }
    }

    pub fn last_seen_id(&self) -> Option<MessageId> {
        self.last_seen_id
    }

    pub fn is_initialized(&self) -> bool {
        self.last_seen_id.is_some()
    }

    /// First observation of a source: start after its newest message
    /// without forwarding history. An empty source starts at zero.
    pub fn initialize(&mut self, newest: Option<MessageId>) {
        self.last_seen_id = Some(newest.unwrap_or(0).max(self.last_seen_id.unwrap_or(0)));
    }

    pub fn is_new(&self, msg: &Message) -> bool {
        self.last_seen_id.is_none_or(|last| msg.id > last)
            && !self.ids.contains(&msg.id)
            && msg
                .media_group
                .as_ref()
                .is_none_or(|key| !self.groups.contains(key))
    }

    /// New messages of a listing, ascending, each id at most once.
    pub fn select_new(&self, listing: impl IntoIterator<Item = Message>) -> Vec<Message> {
        listing
            .into_iter()
            .filter(|m| self.is_new(m))
            .map(|m| (m.id, m))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect()
    }

    pub fn mark_handled(&mut self, unit: &DispatchUnit) {
        for id in unit.ids() {
            self.ids.insert(id);
        }
        if let Some(key) = unit.group_key() {
            self.groups.insert(key.clone());
        }
        let last = unit.last_id();
        self.last_seen_id = Some(self.last_seen_id.map_or(last, |seen| seen.max(last)));
    }
}
