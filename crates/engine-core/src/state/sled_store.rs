use crate::{error::StoreError, state::TaskStore};
use async_trait::async_trait;
use model::{
    core::identifiers::{OwnerId, TaskId},
    task::{
        journal::JournalEntry,
        record::{TaskRecord, TaskUpdate},
    },
};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

/// [`TaskStore`] on an embedded sled tree, values encoded with bincode.
pub struct SledTaskStore {
    db: sled::Db,
}

impl SledTaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn task_key(id: &TaskId) -> String {
        format!("task:{}", id)
    }

    #[inline]
    fn journal_prefix(id: &TaskId) -> String {
        format!("jnl:{}:", id)
    }

    fn decode_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut tasks = Vec::new();
        for item in self.db.scan_prefix("task:") {
            let (_key, value) = item?;
            tasks.push(bincode::deserialize::<TaskRecord>(&value)?);
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore for SledTaskStore {
    async fn create_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let key = Self::task_key(&record.id);
        let bytes = bincode::serialize(record)?;

        // compare_and_swap with an expected `None` only inserts a fresh key.
        match self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::AlreadyExists(record.id.clone())),
        }
    }

    async fn update_task_progress(
        &self,
        id: &TaskId,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        let key = Self::task_key(id);

        let result = self.db.transaction::<_, _, StoreError>(|tx_db| {
            let existing = tx_db.get(key.as_bytes())?.ok_or_else(|| {
                ConflictableTransactionError::Abort(StoreError::NotFound(id.clone()))
            })?;

            let mut record: TaskRecord = bincode::deserialize(&existing)
                .map_err(|e| ConflictableTransactionError::Abort(StoreError::Codec(e)))?;
            record.apply(&update);

            let bytes = bincode::serialize(&record)
                .map_err(|e| ConflictableTransactionError::Abort(StoreError::Codec(e)))?;
            tx_db.insert(key.as_bytes(), bytes)?;
            Ok(record)
        });

        match result {
            Ok(record) => Ok(record),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Sled(e)),
        }
    }

    async fn load_task(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        match self.db.get(Self::task_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_active_tasks(&self, owner: &OwnerId) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .decode_tasks()?
            .into_iter()
            .filter(|t| &t.owner == owner && !t.status.is_terminal())
            .collect())
    }

    async fn list_tasks(&self, owner: Option<&OwnerId>) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .decode_tasks()?
            .into_iter()
            .filter(|t| owner.is_none_or(|o| &t.owner == o))
            .collect())
    }

    async fn append_journal(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        // generate_id is monotonic across restarts; zero padding keeps scan order.
        let seq = self.db.generate_id()?;
        let key = format!("{}{:020}", Self::journal_prefix(&entry.task_id), seq);
        self.db.insert(key, bincode::serialize(entry)?)?;
        Ok(())
    }

    async fn task_history(&self, id: &TaskId) -> Result<Vec<JournalEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(Self::journal_prefix(id)) {
            let (_key, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let key = Self::task_key(id);
        if !self.db.contains_key(&key)? {
            return Err(StoreError::NotFound(id.clone()));
        }

        let mut batch = sled::Batch::default();
        batch.remove(key.as_bytes());
        for item in self.db.scan_prefix(Self::journal_prefix(id)) {
            let (journal_key, _) = item?;
            batch.remove(journal_key);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }
}
