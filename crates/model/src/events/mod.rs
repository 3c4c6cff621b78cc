use crate::{
    core::identifiers::{MessageId, OwnerId, StreamId, TaskId},
    task::status::TaskStatus,
};
use chrono::{DateTime, Utc};
use std::{fmt::Debug, time::Duration};

/// A trait for events that can be published on the EventBus.
pub trait Event: Send + Sync + Debug + 'static {
    /// Returns a unique identifier for this event type.
    fn event_type(&self) -> &'static str;
}

/// Emitted on every lifecycle transition of a task.
#[derive(Debug, Clone)]
pub struct TaskStatusChanged {
    pub task_id: TaskId,
    pub owner: OwnerId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event for TaskStatusChanged {
    fn event_type(&self) -> &'static str {
        "task.status_changed"
    }
}

/// Emitted when a checkpoint is flushed.
#[derive(Debug, Clone)]
pub struct TaskProgressed {
    pub task_id: TaskId,
    pub current_id: Option<MessageId>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl Event for TaskProgressed {
    fn event_type(&self) -> &'static str {
        "task.progressed"
    }
}

/// Emitted when a unit is given up on.
#[derive(Debug, Clone)]
pub struct UnitFailed {
    pub task_id: TaskId,
    pub source: StreamId,
    pub first_id: MessageId,
    pub last_id: MessageId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Event for UnitFailed {
    fn event_type(&self) -> &'static str {
        "task.unit_failed"
    }
}

/// Emitted when the transport mandates a cool-down.
#[derive(Debug, Clone)]
pub struct TransportThrottled {
    pub wait: Duration,
    pub timestamp: DateTime<Utc>,
}

impl Event for TransportThrottled {
    fn event_type(&self) -> &'static str {
        "transport.throttled"
    }
}
