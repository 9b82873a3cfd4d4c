use bazaar_audit::{AuditError, AuditLogId};
use bazaar_core::RegistryError;
use bazaar_market::RepositoryError;

/// Revert engine error.
#[derive(Debug, thiserror::Error)]
pub enum RevertError {
    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),

    #[error("configuration error: {0}")]
    Configuration(#[from] RegistryError),

    /// ERROR-level validation result. Nothing was changed.
    #[error("revert rejected: {0}")]
    Validation(String),

    #[error("revert requires approval: {0}")]
    ApprovalRequired(String),

    /// The entity changed between validation and save, or another revert
    /// of the same entry won the race.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("{0} no longer exists")]
    EntityNotFound(String),

    #[error("unreadable audit snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("repository error: {0}")]
    Repository(RepositoryError),

    #[error("audit error: {0}")]
    Audit(AuditError),
}

impl From<AuditError> for RevertError {
    fn from(value: AuditError) -> Self {
        match value {
            AuditError::AlreadyReverted { .. } => RevertError::Conflict(value.to_string()),
            other => RevertError::Audit(other),
        }
    }
}

impl From<RepositoryError> for RevertError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(msg) => RevertError::Conflict(msg),
            other => RevertError::Repository(other),
        }
    }
}

pub type RevertResult<T> = Result<T, RevertError>;
