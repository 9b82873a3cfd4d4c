//! Batch task orchestration.
//!
//! `PENDING -(begin)-> PROCESSING -(no unfinished items)-> SUCCESS | PARTIAL_SUCCESS | FAILED`

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use bazaar_core::RequestContext;

use crate::error::{BatchError, BatchResult};
use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError, ProcessorRegistry};
use crate::store::BatchTaskStore;
use crate::task::{BatchTask, BatchTaskId, BatchTaskItem, ItemStatus};

/// Drains the items of a task through the processor registered for its type.
pub struct BatchOrchestrator<S: BatchTaskStore> {
    store: S,
    processors: Arc<ProcessorRegistry>,
}

impl<S: BatchTaskStore> BatchOrchestrator<S> {
    pub fn new(store: S, processors: Arc<ProcessorRegistry>) -> Self {
        Self { store, processors }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Process every pending item of the task, then settle its status.
    pub fn orchestrate(&self, ctx: &RequestContext, task_id: BatchTaskId) -> BatchResult<BatchTask> {
        self.run(ctx, task_id, None)
    }

    /// Process the pending items of one shard. The last shard to finish
    /// settles the task status.
    pub fn process_shard(
        &self,
        ctx: &RequestContext,
        task_id: BatchTaskId,
        shard_key: &str,
    ) -> BatchResult<BatchTask> {
        self.run(ctx, task_id, Some(shard_key))
    }

    fn run(&self, ctx: &RequestContext, task_id: BatchTaskId, shard: Option<&str>) -> BatchResult<BatchTask> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or(BatchError::TaskNotFound(task_id))?;

        if task.campus_id != ctx.campus_id {
            return Err(BatchError::CampusMismatch {
                task_id,
                task_campus: task.campus_id,
                requested: ctx.campus_id,
            });
        }
        if task.status.is_terminal() {
            return Err(BatchError::AlreadyFinished(task_id, task.status));
        }

        let result = self
            .store
            .begin_task(task_id, Utc::now())
            .map_err(BatchError::from)
            .and_then(|task| {
                info!(
                    task_id = %task.id,
                    batch_type = %task.batch_type,
                    shard = shard.unwrap_or("*"),
                    total_items = task.total_items,
                    "batch task processing"
                );
                self.drain(&task, shard)
            });

        if let Err(e) = result {
            error!(task_id = %task_id, batch_type = %task.batch_type, error = %e, "batch task failed");
            self.abort(task_id, &e);
            return Err(e);
        }

        match self.store.finalize_if_complete(task_id, Utc::now())? {
            Some(done) => {
                info!(
                    task_id = %done.id,
                    batch_type = %done.batch_type,
                    status = ?done.status,
                    success_count = done.success_count,
                    error_count = done.error_count,
                    "batch task finished"
                );
                Ok(done)
            }
            None => {
                debug!(task_id = %task_id, shard = shard.unwrap_or("*"), "shard drained, task still running");
                self.store
                    .get_task(task_id)?
                    .ok_or(BatchError::TaskNotFound(task_id))
            }
        }
    }

    fn drain(&self, task: &BatchTask, shard: Option<&str>) -> BatchResult<()> {
        let processor = self.processors.resolve(&task.batch_type)?.clone();
        let cx = ItemContext {
            request: task.context(),
            task_id: task.id,
            batch_type: task.batch_type,
        };

        let pending = self.store.list_items(task.id, Some(ItemStatus::Pending), shard)?;
        for candidate in pending {
            // Another worker may have taken it.
            let Some(mut item) = self.store.claim_item(candidate.id)? else {
                continue;
            };

            let started = Instant::now();
            let result = invoke(processor.as_ref(), &cx, &item);
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            record(&mut item, result, elapsed)?;

            self.store.complete_item(&item)?;
        }
        Ok(())
    }

    fn abort(&self, task_id: BatchTaskId, cause: &BatchError) {
        if let Err(e) = self.store.abort_task(task_id, &cause.to_string(), Utc::now()) {
            error!(task_id = %task_id, error = %e, "failed to mark batch task failed");
        }
    }
}

fn invoke(
    processor: &dyn BatchProcessor,
    cx: &ItemContext,
    item: &BatchTaskItem,
) -> Result<ItemOutcome, ProcessorError> {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process_item(cx, item))) {
        Ok(result) => result,
        Err(_) => {
            error!(task_id = %cx.task_id, item_id = %item.id, "processor panicked");
            Ok(ItemOutcome::failed("processor panicked"))
        }
    }
}

fn record(
    item: &mut BatchTaskItem,
    result: Result<ItemOutcome, ProcessorError>,
    elapsed_ms: u64,
) -> BatchResult<()> {
    match result {
        Ok(outcome) if outcome.success => item.succeed(outcome.data, elapsed_ms)?,
        Ok(outcome) => {
            debug!(item_id = %item.id, target_id = %item.target_id, reason = %outcome.message, "item failed");
            item.fail(outcome.message, elapsed_ms)?
        }
        Err(e) => {
            warn!(item_id = %item.id, target_id = %item.target_id, error = %e, "item processing error");
            item.fail(e.to_string(), elapsed_ms)?
        }
    }
    Ok(())
}
