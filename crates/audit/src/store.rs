//! Audit log ports and the in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use bazaar_core::EntityId;

use crate::log::{AuditAction, AuditLog, AuditLogId, EntityType, NewAuditLog};

/// Audit store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),
    #[error("audit storage error: {0}")]
    Storage(String),
    /// A second revert entry for the same original.
    #[error("audit log {original} already reverted by {by}")]
    AlreadyReverted { original: AuditLogId, by: AuditLogId },
}

/// Append-only writer. Entries can never be updated or removed through it.
///
/// At most one `Revert` entry may reference a given original; a second one
/// is rejected with [`AuditError::AlreadyReverted`].
pub trait AuditLogWriter: Send + Sync {
    fn log_entity_change(&self, entry: NewAuditLog) -> Result<AuditLog, AuditError>;
}

/// Read access for the revert engine and admin tooling.
pub trait AuditLogReader: Send + Sync {
    fn find(&self, id: AuditLogId) -> Result<Option<AuditLog>, AuditError>;

    /// The revert entry pointing at `original`, if it was already reverted.
    fn find_revert_of(&self, original: AuditLogId) -> Result<Option<AuditLog>, AuditError>;

    /// Entries for one entity, oldest first.
    fn list_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<AuditLog>, AuditError>;
}

impl<S> AuditLogWriter for Arc<S>
where
    S: AuditLogWriter + ?Sized,
{
    fn log_entity_change(&self, entry: NewAuditLog) -> Result<AuditLog, AuditError> {
        (**self).log_entity_change(entry)
    }
}

impl<S> AuditLogReader for Arc<S>
where
    S: AuditLogReader + ?Sized,
{
    fn find(&self, id: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        (**self).find(id)
    }

    fn find_revert_of(&self, original: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        (**self).find_revert_of(original)
    }

    fn list_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<AuditLog>, AuditError> {
        (**self).list_for_entity(entity_type, entity_id)
    }
}

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<HashMap<AuditLogId, AuditLog>>,
    unavailable: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All entries, oldest first.
    pub fn all(&self) -> Vec<AuditLog> {
        let entries = match self.entries.read() {
            Ok(e) => e,
            Err(_) => return vec![],
        };
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|e| (e.created_at, e.id.0));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every write fail, as a storage outage would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl AuditLogWriter for InMemoryAuditLog {
    fn log_entity_change(&self, entry: NewAuditLog) -> Result<AuditLog, AuditError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("audit store unavailable".to_string()));
        }

        let log = entry.into_log(AuditLogId::new(), Utc::now());
        let mut entries = self
            .entries
            .write()
            .map_err(|e| AuditError::Storage(e.to_string()))?;

        if let (AuditAction::Revert, Some(original)) = (log.action, log.reverted_log_id) {
            let previous = entries
                .values()
                .find(|e| e.action == AuditAction::Revert && e.reverted_log_id == Some(original));
            if let Some(previous) = previous {
                return Err(AuditError::AlreadyReverted {
                    original,
                    by: previous.id,
                });
            }
        }
        entries.insert(log.id, log.clone());

        debug!(
            audit_id = %log.id,
            entity_type = %log.entity_type,
            entity_id = %log.entity_id,
            action = ?log.action,
            "audit entry written"
        );
        Ok(log)
    }
}

impl AuditLogReader for InMemoryAuditLog {
    fn find(&self, id: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(entries.get(&id).cloned())
    }

    fn find_revert_of(&self, original: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(entries
            .values()
            .find(|e| e.action == AuditAction::Revert && e.reverted_log_id == Some(original))
            .cloned())
    }

    fn list_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<Vec<AuditLog>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        let mut result: Vec<_> = entries
            .values()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect();
        result.sort_by_key(|e| (e.created_at, e.id.0));
        Ok(result)
    }
}
