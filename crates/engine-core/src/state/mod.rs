use crate::error::StoreError;
use async_trait::async_trait;
use model::{
    core::identifiers::{OwnerId, TaskId},
    task::{
        journal::JournalEntry,
        record::{TaskRecord, TaskUpdate},
    },
};

pub mod sled_store;

/// Durable task state.
///
/// Running tasks write at a throttled cadence, so implementations only
/// need to sustain a few writes per task per minute.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, record: &TaskRecord) -> Result<(), StoreError>;

    /// Applies a partial update atomically and returns the stored result.
    async fn update_task_progress(
        &self,
        id: &TaskId,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError>;

    async fn load_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Non-terminal tasks of one owner.
    async fn list_active_tasks(&self, owner: &OwnerId) -> Result<Vec<TaskRecord>, StoreError>;

    /// All tasks, optionally of one owner, oldest first.
    async fn list_tasks(&self, owner: Option<&OwnerId>) -> Result<Vec<TaskRecord>, StoreError>;

    async fn append_journal(&self, entry: &JournalEntry) -> Result<(), StoreError>;

    async fn task_history(&self, id: &TaskId) -> Result<Vec<JournalEntry>, StoreError>;

    /// Removes a task together with its journal.
    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError>;
}
