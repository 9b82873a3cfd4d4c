//! Batch task storage.
//!
//! Every mutation that must be atomic with respect to concurrent shard
//! workers (claiming an item, completing an item and bumping the task
//! counters, finalising the task) is a single store call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use bazaar_core::DomainError;

use crate::task::{BatchItemId, BatchStatus, BatchTask, BatchTaskId, BatchTaskItem, ItemStatus};

/// Batch store abstraction.
pub trait BatchTaskStore: Send + Sync {
    /// Persist a new task together with all of its items.
    fn create(&self, task: BatchTask, items: Vec<BatchTaskItem>) -> Result<BatchTaskId, BatchStoreError>;

    fn get_task(&self, task_id: BatchTaskId) -> Result<Option<BatchTask>, BatchStoreError>;

    /// Items of a task ordered by sequence, optionally filtered by status and shard.
    fn list_items(
        &self,
        task_id: BatchTaskId,
        status: Option<ItemStatus>,
        shard_key: Option<&str>,
    ) -> Result<Vec<BatchTaskItem>, BatchStoreError>;

    /// Failed items of a task, for inspection by admin tooling.
    fn list_failed_items(&self, task_id: BatchTaskId) -> Result<Vec<BatchTaskItem>, BatchStoreError> {
        self.list_items(task_id, Some(ItemStatus::Failed), None)
    }

    /// `Pending -> Processing` on the task. Idempotent while processing.
    fn begin_task(&self, task_id: BatchTaskId, now: DateTime<Utc>) -> Result<BatchTask, BatchStoreError>;

    /// Claim a pending item (`Pending -> Processing`).
    /// Returns `None` if another worker already claimed it.
    fn claim_item(&self, item_id: BatchItemId) -> Result<Option<BatchTaskItem>, BatchStoreError>;

    /// Store a finished item and count its outcome on the parent task.
    fn complete_item(&self, item: &BatchTaskItem) -> Result<BatchTask, BatchStoreError>;

    /// Settle the task status once no item is pending or processing.
    /// Returns `None` while work remains.
    fn finalize_if_complete(
        &self,
        task_id: BatchTaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchTask>, BatchStoreError>;

    /// Fail the task and every unfinished item with `message`.
    fn abort_task(
        &self,
        task_id: BatchTaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchTask, BatchStoreError>;

    /// Per-status item counts.
    fn item_stats(&self, task_id: BatchTaskId) -> Result<ItemStats, BatchStoreError>;
}

/// Batch store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchStoreError {
    #[error("batch task not found: {0}")]
    TaskNotFound(BatchTaskId),
    #[error("batch item not found: {0}")]
    ItemNotFound(BatchItemId),
    #[error("batch task already exists: {0}")]
    AlreadyExists(BatchTaskId),
    #[error("batch item {0} is finished and immutable")]
    ItemImmutable(BatchItemId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemStats {
    pub pending: u32,
    pub processing: u32,
    pub success: u32,
    pub failed: u32,
}

impl ItemStats {
    pub fn unfinished(&self) -> u32 {
        self.pending + self.processing
    }

    pub fn total(&self) -> u32 {
        self.pending + self.processing + self.success + self.failed
    }
}

#[derive(Debug, Default)]
struct Tables {
    tasks: HashMap<BatchTaskId, BatchTask>,
    items: HashMap<BatchItemId, BatchTaskItem>,
    by_task: HashMap<BatchTaskId, Vec<BatchItemId>>,
}

impl Tables {
    fn task_mut(&mut self, task_id: BatchTaskId) -> Result<&mut BatchTask, BatchStoreError> {
        self.tasks
            .get_mut(&task_id)
            .ok_or(BatchStoreError::TaskNotFound(task_id))
    }

    fn stats(&self, task_id: BatchTaskId) -> ItemStats {
        let mut stats = ItemStats::default();
        for item in self.items_of(task_id) {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Processing => stats.processing += 1,
                ItemStatus::Success => stats.success += 1,
                ItemStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn items_of(&self, task_id: BatchTaskId) -> impl Iterator<Item = &BatchTaskItem> {
        self.by_task
            .get(&task_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
    }
}

/// In-memory batch store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBatchTaskStore {
    inner: RwLock<Tables>,
}

impl InMemoryBatchTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, BatchStoreError> {
        self.inner
            .read()
            .map_err(|e| BatchStoreError::Storage(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, BatchStoreError> {
        self.inner
            .write()
            .map_err(|e| BatchStoreError::Storage(e.to_string()))
    }
}

impl BatchTaskStore for InMemoryBatchTaskStore {
    fn create(&self, task: BatchTask, items: Vec<BatchTaskItem>) -> Result<BatchTaskId, BatchStoreError> {
        let mut tables = self.write()?;
        if tables.tasks.contains_key(&task.id) {
            return Err(BatchStoreError::AlreadyExists(task.id));
        }

        let task_id = task.id;
        let ids: Vec<BatchItemId> = items.iter().map(|i| i.id).collect();
        for item in items {
            tables.items.insert(item.id, item);
        }
        tables.by_task.insert(task_id, ids);
        tables.tasks.insert(task_id, task);
        Ok(task_id)
    }

    fn get_task(&self, task_id: BatchTaskId) -> Result<Option<BatchTask>, BatchStoreError> {
        Ok(self.read()?.tasks.get(&task_id).cloned())
    }

    fn list_items(
        &self,
        task_id: BatchTaskId,
        status: Option<ItemStatus>,
        shard_key: Option<&str>,
    ) -> Result<Vec<BatchTaskItem>, BatchStoreError> {
        let tables = self.read()?;
        if !tables.tasks.contains_key(&task_id) {
            return Err(BatchStoreError::TaskNotFound(task_id));
        }

        let mut result: Vec<_> = tables
            .items_of(task_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .filter(|i| shard_key.map_or(true, |k| i.shard_key.as_deref() == Some(k)))
            .cloned()
            .collect();
        result.sort_by_key(|i| i.sequence);
        Ok(result)
    }

    fn begin_task(&self, task_id: BatchTaskId, now: DateTime<Utc>) -> Result<BatchTask, BatchStoreError> {
        let mut tables = self.write()?;
        let task = tables.task_mut(task_id)?;
        task.begin(now)?;
        Ok(task.clone())
    }

    fn claim_item(&self, item_id: BatchItemId) -> Result<Option<BatchTaskItem>, BatchStoreError> {
        let mut tables = self.write()?;
        let item = tables
            .items
            .get_mut(&item_id)
            .ok_or(BatchStoreError::ItemNotFound(item_id))?;

        if item.status != ItemStatus::Pending {
            return Ok(None);
        }
        item.start()?;
        Ok(Some(item.clone()))
    }

    fn complete_item(&self, item: &BatchTaskItem) -> Result<BatchTask, BatchStoreError> {
        if !item.status.is_terminal() {
            return Err(BatchStoreError::Domain(DomainError::invariant(format!(
                "item {} completed while {:?}",
                item.id, item.status
            ))));
        }

        let mut tables = self.write()?;
        let stored = tables
            .items
            .get(&item.id)
            .ok_or(BatchStoreError::ItemNotFound(item.id))?;
        if stored.status.is_terminal() {
            return Err(BatchStoreError::ItemImmutable(item.id));
        }

        let task = tables.task_mut(item.task_id)?;
        task.record_outcome(item.status == ItemStatus::Success)?;
        let task = task.clone();

        tables.items.insert(item.id, item.clone());
        Ok(task)
    }

    fn finalize_if_complete(
        &self,
        task_id: BatchTaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchTask>, BatchStoreError> {
        let mut tables = self.write()?;
        let unfinished = tables.stats(task_id).unfinished();
        let task = tables.task_mut(task_id)?;

        if task.status.is_terminal() {
            return Ok(Some(task.clone()));
        }
        if unfinished > 0 || task.status != BatchStatus::Processing {
            return Ok(None);
        }
        task.finish(now)?;
        Ok(Some(task.clone()))
    }

    fn abort_task(
        &self,
        task_id: BatchTaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchTask, BatchStoreError> {
        let mut tables = self.write()?;
        let ids = tables.by_task.get(&task_id).cloned().unwrap_or_default();

        let mut abandoned = 0u32;
        for id in ids {
            if let Some(item) = tables.items.get_mut(&id) {
                if !item.status.is_terminal() {
                    item.abandon(format!("task aborted: {message}"))?;
                    abandoned += 1;
                }
            }
        }

        let task = tables.task_mut(task_id)?;
        if task.status.is_terminal() {
            return Ok(task.clone());
        }
        // Abandoned items count as failures so the counters add up to the total.
        task.error_count = (task.error_count + abandoned).min(task.total_items - task.success_count);
        task.abort(message, now)?;
        Ok(task.clone())
    }

    fn item_stats(&self, task_id: BatchTaskId) -> Result<ItemStats, BatchStoreError> {
        let tables = self.read()?;
        if !tables.tasks.contains_key(&task_id) {
            return Err(BatchStoreError::TaskNotFound(task_id));
        }
        Ok(tables.stats(task_id))
    }
}

impl<S> BatchTaskStore for Arc<S>
where
    S: BatchTaskStore + ?Sized,
{
    fn create(&self, task: BatchTask, items: Vec<BatchTaskItem>) -> Result<BatchTaskId, BatchStoreError> {
        (**self).create(task, items)
    }

    fn get_task(&self, task_id: BatchTaskId) -> Result<Option<BatchTask>, BatchStoreError> {
        (**self).get_task(task_id)
    }

    fn list_items(
        &self,
        task_id: BatchTaskId,
        status: Option<ItemStatus>,
        shard_key: Option<&str>,
    ) -> Result<Vec<BatchTaskItem>, BatchStoreError> {
        (**self).list_items(task_id, status, shard_key)
    }

    fn begin_task(&self, task_id: BatchTaskId, now: DateTime<Utc>) -> Result<BatchTask, BatchStoreError> {
        (**self).begin_task(task_id, now)
    }

    fn claim_item(&self, item_id: BatchItemId) -> Result<Option<BatchTaskItem>, BatchStoreError> {
        (**self).claim_item(item_id)
    }

    fn complete_item(&self, item: &BatchTaskItem) -> Result<BatchTask, BatchStoreError> {
        (**self).complete_item(item)
    }

    fn finalize_if_complete(
        &self,
        task_id: BatchTaskId,
        now: DateTime<Utc>,
    ) -> Result<Option<BatchTask>, BatchStoreError> {
        (**self).finalize_if_complete(task_id, now)
    }

    fn abort_task(
        &self,
        task_id: BatchTaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchTask, BatchStoreError> {
        (**self).abort_task(task_id, message, now)
    }

    fn item_stats(&self, task_id: BatchTaskId) -> Result<ItemStats, BatchStoreError> {
        (**self).item_stats(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BatchType, NewBatchItem};
    use bazaar_core::{CampusId, EntityId, RequestContext, UserId};

    fn seed(store: &InMemoryBatchTaskStore, shards: &[&str]) -> BatchTaskId {
        let ctx = RequestContext::new(CampusId::new(), UserId::new());
        let task = BatchTask::new(&ctx, BatchType::GoodsOffline, shards.len() as u32);
        let items = shards
            .iter()
            .enumerate()
            .map(|(i, shard)| {
                BatchTaskItem::new(
                    task.id,
                    i as u32,
                    NewBatchItem::new(EntityId::new(), serde_json::Value::Null).with_shard(*shard),
                )
            })
            .collect();
        store.create(task, items).unwrap()
    }

    #[test]
    fn claim_is_exclusive() {
        let store = InMemoryBatchTaskStore::new();
        let task_id = seed(&store, &["a"]);
        let item = store.list_items(task_id, None, None).unwrap().remove(0);

        assert!(store.claim_item(item.id).unwrap().is_some());
        assert!(store.claim_item(item.id).unwrap().is_none());
    }

    #[test]
    fn list_items_filters_by_shard_and_keeps_order() {
        let store = InMemoryBatchTaskStore::new();
        let task_id = seed(&store, &["a", "b", "a", "b", "a"]);

        let shard_a = store.list_items(task_id, None, Some("a")).unwrap();
        assert_eq!(
            shard_a.iter().map(|i| i.sequence).collect::<Vec<_>>(),
            vec![0, 2, 4]
        );
    }

    #[test]
    fn completed_items_are_immutable() {
        let store = InMemoryBatchTaskStore::new();
        let task_id = seed(&store, &["a"]);
        store.begin_task(task_id, Utc::now()).unwrap();

        let id = store.list_items(task_id, None, None).unwrap()[0].id;
        let mut item = store.claim_item(id).unwrap().unwrap();
        item.succeed(serde_json::json!({}), 1).unwrap();
        store.complete_item(&item).unwrap();

        let err = store.complete_item(&item).unwrap_err();
        assert!(matches!(err, BatchStoreError::ItemImmutable(_)));
        assert_eq!(store.get_task(task_id).unwrap().unwrap().success_count, 1);
    }

    #[test]
    fn finalize_waits_for_unfinished_items() {
        let store = InMemoryBatchTaskStore::new();
        let task_id = seed(&store, &["a", "b"]);
        store.begin_task(task_id, Utc::now()).unwrap();

        let items = store.list_items(task_id, None, None).unwrap();
        let mut first = store.claim_item(items[0].id).unwrap().unwrap();
        first.fail("nope", 1).unwrap();
        store.complete_item(&first).unwrap();

        assert!(store.finalize_if_complete(task_id, Utc::now()).unwrap().is_none());

        let mut second = store.claim_item(items[1].id).unwrap().unwrap();
        second.succeed(serde_json::json!({}), 1).unwrap();
        store.complete_item(&second).unwrap();

        let task = store.finalize_if_complete(task_id, Utc::now()).unwrap().unwrap();
        assert_eq!(task.status, BatchStatus::PartialSuccess);
    }

    #[test]
    fn abort_fails_unfinished_items() {
        let store = InMemoryBatchTaskStore::new();
        let task_id = seed(&store, &["a", "a", "a"]);
        store.begin_task(task_id, Utc::now()).unwrap();

        let items = store.list_items(task_id, None, None).unwrap();
        store.claim_item(items[0].id).unwrap();

        let task = store.abort_task(task_id, "db down", Utc::now()).unwrap();
        assert_eq!(task.status, BatchStatus::Failed);
        assert_eq!(task.error_summary.as_deref(), Some("db down"));
        assert_eq!(task.error_count, 3);

        let stats = store.item_stats(task_id).unwrap();
        assert_eq!(stats.unfinished(), 0);
        assert_eq!(stats.failed, 3);
    }
}
