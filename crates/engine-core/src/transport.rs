use crate::error::TransportError;
use async_trait::async_trait;
use model::{
    core::identifiers::{MessageId, StreamId},
    records::{
        content::{GroupContent, Outgoing},
        message::{EntityInfo, Message},
    },
};

/// Ids of the messages created at the target by one send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_ids: Vec<MessageId>,
}

/// Chat-platform client consumed by the engine.
///
/// Implementations report a mandated cool-down as
/// [`TransportError::Throttled`] and never sleep on it themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns one slot per requested id, `None` where the message is missing.
    async fn get_messages_by_ids(
        &self,
        stream: &StreamId,
        ids: &[MessageId],
    ) -> Result<Vec<Option<Message>>, TransportError>;

    /// Newest messages first, at most `limit` of them.
    async fn get_recent_messages(
        &self,
        stream: &StreamId,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError>;

    async fn send_message(
        &self,
        target: &StreamId,
        content: &Outgoing,
    ) -> Result<SendReceipt, TransportError>;

    /// Sends every item of a group in one platform call.
    async fn send_media_group(
        &self,
        target: &StreamId,
        content: &GroupContent,
    ) -> Result<SendReceipt, TransportError>;

    async fn get_entity(&self, stream: &StreamId) -> Result<EntityInfo, TransportError>;
}
