//! Batch task and item types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bazaar_core::{CampusId, DomainError, DomainResult, EntityId, RequestContext, UserId};

/// Unique batch task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchTaskId(pub Uuid);

impl BatchTaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique batch item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchItemId(pub Uuid);

impl BatchItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bulk operation kind. Discriminator for the processor registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    GoodsOnline,
    GoodsOffline,
    GoodsDelete,
    InventoryUpdate,
    PriceAdjust,
    BulkNotification,
}

impl BatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::GoodsOnline => "goods_online",
            BatchType::GoodsOffline => "goods_offline",
            BatchType::GoodsDelete => "goods_delete",
            BatchType::InventoryUpdate => "inventory_update",
            BatchType::PriceAdjust => "price_adjust",
            BatchType::BulkNotification => "bulk_notification",
        }
    }
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle: `Pending -> Processing -> {Success | PartialSuccess | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Success,
    PartialSuccess,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Success | BatchStatus::PartialSuccess | BatchStatus::Failed
        )
    }

    /// Terminal status implied by item outcome counts.
    pub fn from_counts(success: u32, error: u32) -> Self {
        if error == 0 {
            BatchStatus::Success
        } else if success > 0 {
            BatchStatus::PartialSuccess
        } else {
            BatchStatus::Failed
        }
    }
}

/// Item lifecycle: `Pending -> Processing -> {Success | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Failed)
    }
}

/// A submitted bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTask {
    pub id: BatchTaskId,
    pub campus_id: CampusId,
    /// Submitter; recorded as the operator on every audit entry of the task.
    pub operator_id: UserId,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub total_items: u32,
    pub success_count: u32,
    pub error_count: u32,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchTask {
    pub fn new(ctx: &RequestContext, batch_type: BatchType, total_items: u32) -> Self {
        Self {
            id: BatchTaskId::new(),
            campus_id: ctx.campus_id,
            operator_id: ctx.operator_id,
            batch_type,
            status: BatchStatus::Pending,
            total_items,
            success_count: 0,
            error_count: 0,
            error_summary: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.campus_id, self.operator_id)
    }

    pub fn processed(&self) -> u32 {
        self.success_count + self.error_count
    }

    /// Move to `Processing`. A task already processing (another shard got
    /// there first) is left as is.
    pub fn begin(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            BatchStatus::Pending => {
                self.status = BatchStatus::Processing;
                self.started_at = Some(now);
                Ok(())
            }
            BatchStatus::Processing => Ok(()),
            status => Err(DomainError::invariant(format!(
                "batch task {} already finished ({status:?})",
                self.id
            ))),
        }
    }

    /// Count one finished item.
    pub fn record_outcome(&mut self, success: bool) -> DomainResult<()> {
        if self.status != BatchStatus::Processing {
            return Err(DomainError::invariant(format!(
                "batch task {} is not processing ({:?})",
                self.id, self.status
            )));
        }
        if self.processed() >= self.total_items {
            return Err(DomainError::invariant(format!(
                "batch task {} already counted all {} items",
                self.id, self.total_items
            )));
        }
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        Ok(())
    }

    /// Settle the terminal status from the counters.
    pub fn finish(&mut self, now: DateTime<Utc>) -> DomainResult<BatchStatus> {
        if self.status != BatchStatus::Processing {
            return Err(DomainError::invariant(format!(
                "batch task {} cannot finish from {:?}",
                self.id, self.status
            )));
        }

        let status = BatchStatus::from_counts(self.success_count, self.error_count);
        self.error_summary = match status {
            BatchStatus::PartialSuccess => Some(format!(
                "{} of {} items failed",
                self.error_count, self.total_items
            )),
            BatchStatus::Failed => Some(format!("all {} items failed", self.error_count)),
            _ => None,
        };
        self.status = status;
        self.finished_at = Some(now);
        Ok(status)
    }

    /// Infrastructure failure: the whole task fails with `message`.
    pub fn abort(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "batch task {} already finished ({:?})",
                self.id, self.status
            )));
        }
        self.status = BatchStatus::Failed;
        self.error_summary = Some(message.into());
        self.finished_at = Some(now);
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        Ok(())
    }
}

/// Item as submitted by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatchItem {
    pub target_id: EntityId,
    pub shard_key: Option<String>,
    pub input: JsonValue,
}

impl NewBatchItem {
    pub fn new(target_id: EntityId, input: JsonValue) -> Self {
        Self {
            target_id,
            shard_key: None,
            input,
        }
    }

    pub fn with_shard(mut self, shard_key: impl Into<String>) -> Self {
        self.shard_key = Some(shard_key.into());
        self
    }
}

/// One target entity's unit of work within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTaskItem {
    pub id: BatchItemId,
    pub task_id: BatchTaskId,
    /// Submission order; items are processed in ascending sequence.
    pub sequence: u32,
    pub target_id: EntityId,
    pub shard_key: Option<String>,
    pub status: ItemStatus,
    /// Opaque to the orchestrator; interpreted by the processor.
    pub input: JsonValue,
    pub output: Option<JsonValue>,
    pub error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl BatchTaskItem {
    pub fn new(task_id: BatchTaskId, sequence: u32, item: NewBatchItem) -> Self {
        Self {
            id: BatchItemId::new(),
            task_id,
            sequence,
            target_id: item.target_id,
            shard_key: item.shard_key,
            status: ItemStatus::Pending,
            input: item.input,
            output: None,
            error_message: None,
            duration_ms: None,
            updated_at: Utc::now(),
        }
    }

    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != ItemStatus::Pending {
            return Err(DomainError::invariant(format!(
                "item {} cannot start from {:?}",
                self.id, self.status
            )));
        }
        self.status = ItemStatus::Processing;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn succeed(&mut self, output: JsonValue, duration_ms: u64) -> DomainResult<()> {
        self.ensure_processing()?;
        self.status = ItemStatus::Success;
        self.output = Some(output);
        self.duration_ms = Some(duration_ms);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, duration_ms: u64) -> DomainResult<()> {
        self.ensure_processing()?;
        self.status = ItemStatus::Failed;
        self.error_message = Some(message.into());
        self.duration_ms = Some(duration_ms);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Force a non-terminal item to `Failed` when its task is aborted.
    pub fn abandon(&mut self, message: impl Into<String>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "item {} already finished ({:?})",
                self.id, self.status
            )));
        }
        self.status = ItemStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_processing(&self) -> DomainResult<()> {
        if self.status != ItemStatus::Processing {
            return Err(DomainError::invariant(format!(
                "item {} is not processing ({:?})",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Decode the input payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.input.clone())
    }

    /// Decode the input payload, treating an absent payload as `T::default()`.
    pub fn payload_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, serde_json::Error> {
        if self.input.is_null() {
            return Ok(T::default());
        }
        self.payload()
    }
}
