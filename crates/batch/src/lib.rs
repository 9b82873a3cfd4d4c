//! `bazaar-batch`: audited bulk operations.
//!
//! A submitted [`BatchTask`] fans out into one [`BatchTaskItem`] per target
//! entity. The [`BatchOrchestrator`] drains the items through the
//! [`BatchProcessor`] registered for the task's [`BatchType`], records each
//! outcome, and settles the task as `Success`, `PartialSuccess` or `Failed`.
//! A failing item never aborts its siblings.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod processors;
pub mod service;
pub mod store;
pub mod task;

pub use dispatcher::{
    BatchDispatcher, DispatchJob, DispatcherConfig, DispatcherStats, InlineDispatcher,
    TaskDispatcher,
};
pub use error::{BatchError, BatchResult};
pub use orchestrator::BatchOrchestrator;
pub use processor::{
    processor_registry, BatchProcessor, ItemContext, ItemOutcome, ProcessorError,
    ProcessorRegistry,
};
pub use processors::{standard_processors, GoodsDeps};
pub use service::{BatchProgress, BatchService};
pub use store::{BatchStoreError, BatchTaskStore, InMemoryBatchTaskStore, ItemStats};
pub use task::{
    BatchItemId, BatchStatus, BatchTask, BatchTaskId, BatchTaskItem, BatchType, ItemStatus,
    NewBatchItem,
};
