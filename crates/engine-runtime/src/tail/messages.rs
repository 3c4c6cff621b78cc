use crate::task::control::TaskControl;
use engine_config::settings::transform::TransformSettings;
use engine_processing::processor::UnitOutcome;
use model::{
    core::identifiers::{MessageId, OwnerId, StreamId, TaskId},
    records::message::Message,
    task::record::TailCursorState,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{mpsc, oneshot};

/// Messages for the tail poller actor.
#[derive(Debug)]
pub enum PollerMsg {
    Register(TailRegistration),

    /// Stops polling for a task and hands back its final cursors.
    Unregister {
        task_id: TaskId,
        ack: oneshot::Sender<BTreeMap<StreamId, TailCursorState>>,
    },

    /// A message pushed by the platform for one of the polled sources.
    Deliver(Message),

    /// Periodic round over the next few sources.
    Tick,
}

/// One source of a tail task with its starting position.
#[derive(Debug, Clone)]
pub struct TailSource {
    pub stream: StreamId,
    /// `None` until the source was observed for the first time.
    pub cursor: Option<TailCursorState>,
    pub settings: TransformSettings,
}

#[derive(Debug)]
pub struct TailRegistration {
    pub task_id: TaskId,
    pub owner: OwnerId,
    pub target: StreamId,
    pub sources: Vec<TailSource>,
    pub control: Arc<TaskControl>,
    pub reports: mpsc::Sender<TailReport>,
}

/// What the poller tells a tail task about its sources.
#[derive(Debug, Clone)]
pub enum TailReport {
    /// First observation of a source; nothing was forwarded.
    Initialized {
        source: StreamId,
        cursor: TailCursorState,
    },

    Resolved {
        source: StreamId,
        first_id: MessageId,
        last_id: MessageId,
        items: usize,
        outcome: UnitOutcome,
        cursor: TailCursorState,
    },

    SourceFailed {
        source: StreamId,
        error: String,
        failures: u32,
    },
}
