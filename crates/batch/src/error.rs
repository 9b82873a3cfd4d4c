use bazaar_core::{CampusId, DomainError, RegistryError};

use crate::store::BatchStoreError;
use crate::task::{BatchStatus, BatchTaskId};

/// Batch engine error.
///
/// Item-level business failures never surface here; they end up as
/// `Failed` items on the task.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("batch task not found: {0}")]
    TaskNotFound(BatchTaskId),

    #[error("configuration error: {0}")]
    Configuration(#[from] RegistryError),

    #[error("batch store error: {0}")]
    Store(#[from] BatchStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("batch task {task_id} belongs to campus {task_campus}, not {requested}")]
    CampusMismatch {
        task_id: BatchTaskId,
        task_campus: CampusId,
        requested: CampusId,
    },

    #[error("batch task {0} already finished ({1:?})")]
    AlreadyFinished(BatchTaskId, BatchStatus),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type BatchResult<T> = Result<T, BatchError>;
