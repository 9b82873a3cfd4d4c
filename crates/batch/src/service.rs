//! Batch submission and status polling.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use bazaar_core::RequestContext;

use crate::dispatcher::{DispatchJob, TaskDispatcher};
use crate::error::{BatchError, BatchResult};
use crate::store::{BatchTaskStore, ItemStats};
use crate::task::{BatchStatus, BatchTask, BatchTaskId, BatchTaskItem, BatchType, NewBatchItem};

/// Snapshot of a task for status polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub task_id: BatchTaskId,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub total_items: u32,
    pub success_count: u32,
    pub error_count: u32,
    pub error_summary: Option<String>,
    pub items: ItemStats,
}

impl BatchProgress {
    fn new(task: BatchTask, items: ItemStats) -> Self {
        Self {
            task_id: task.id,
            batch_type: task.batch_type,
            status: task.status,
            total_items: task.total_items,
            success_count: task.success_count,
            error_count: task.error_count,
            error_summary: task.error_summary,
            items,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Entry point for submitting bulk operations.
pub struct BatchService<S, D> {
    store: S,
    dispatcher: D,
}

impl<S: BatchTaskStore, D: TaskDispatcher> BatchService<S, D> {
    pub fn new(store: S, dispatcher: D) -> Self {
        Self { store, dispatcher }
    }

    /// Create the task and its items, then queue one orchestration run.
    /// Returns as soon as the run is queued.
    pub fn submit_batch_task(
        &self,
        ctx: &RequestContext,
        batch_type: BatchType,
        items: Vec<NewBatchItem>,
    ) -> BatchResult<BatchTaskId> {
        let task_id = self.create(ctx, batch_type, items)?;
        self.dispatch_or_abort(task_id, DispatchJob::Orchestrate { ctx: *ctx, task_id })?;
        Ok(task_id)
    }

    /// Like [`submit_batch_task`](Self::submit_batch_task), but queues one
    /// shard run per distinct shard key. Every item must carry a key.
    pub fn submit_sharded(
        &self,
        ctx: &RequestContext,
        batch_type: BatchType,
        items: Vec<NewBatchItem>,
    ) -> BatchResult<BatchTaskId> {
        let mut shards = BTreeSet::new();
        for item in &items {
            match &item.shard_key {
                Some(key) => {
                    shards.insert(key.clone());
                }
                None => {
                    return Err(BatchError::InvalidRequest(format!(
                        "item for {} has no shard key",
                        item.target_id
                    )));
                }
            }
        }

        let task_id = self.create(ctx, batch_type, items)?;
        if shards.is_empty() {
            // Nothing to fan out; a plain run settles the empty task.
            self.dispatch_or_abort(task_id, DispatchJob::Orchestrate { ctx: *ctx, task_id })?;
            return Ok(task_id);
        }

        info!(task_id = %task_id, shards = shards.len(), "fanning out batch task");
        for shard_key in shards {
            self.dispatch_or_abort(
                task_id,
                DispatchJob::Shard {
                    ctx: *ctx,
                    task_id,
                    shard_key,
                },
            )?;
        }
        Ok(task_id)
    }

    pub fn task_progress(&self, task_id: BatchTaskId) -> BatchResult<BatchProgress> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or(BatchError::TaskNotFound(task_id))?;
        let items = self.store.item_stats(task_id)?;
        Ok(BatchProgress::new(task, items))
    }

    pub fn failed_items(&self, task_id: BatchTaskId) -> BatchResult<Vec<BatchTaskItem>> {
        Ok(self.store.list_failed_items(task_id)?)
    }

    fn create(&self, ctx: &RequestContext, batch_type: BatchType, items: Vec<NewBatchItem>) -> BatchResult<BatchTaskId> {
        let total = u32::try_from(items.len())
            .map_err(|_| BatchError::InvalidRequest(format!("too many items: {}", items.len())))?;

        let task = BatchTask::new(ctx, batch_type, total);
        let rows = items
            .into_iter()
            .enumerate()
            .map(|(seq, item)| BatchTaskItem::new(task.id, seq as u32, item))
            .collect();

        let task_id = self.store.create(task, rows)?;
        info!(
            task_id = %task_id,
            batch_type = %batch_type,
            campus_id = %ctx.campus_id,
            operator_id = %ctx.operator_id,
            total_items = total,
            "batch task submitted"
        );
        Ok(task_id)
    }

    fn dispatch_or_abort(&self, task_id: BatchTaskId, job: DispatchJob) -> BatchResult<()> {
        if let Err(e) = self.dispatcher.dispatch(job) {
            error!(task_id = %task_id, error = %e, "batch task dispatch failed");
            if let Err(abort) = self.store.abort_task(task_id, &e.to_string(), Utc::now()) {
                error!(task_id = %task_id, error = %abort, "failed to mark batch task failed");
            }
            return Err(e);
        }
        Ok(())
    }
}
