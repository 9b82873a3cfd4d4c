//! Audit log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bazaar_core::{CampusId, EntityId, UserId};

/// Unique audit entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of entity an audit entry describes. Discriminator for revert strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Goods,
    Order,
    User,
    Dispute,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Goods => "goods",
            EntityType::Order => "order",
            EntityType::User => "user",
            EntityType::Dispute => "dispute",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the audited operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    StatusChange,
    PriceChange,
    InventoryChange,
    Delete,
    /// Undo of an earlier entry (see [`AuditLog::reverted_log_id`]).
    Revert,
}

impl AuditAction {
    /// Actions whose `before` snapshot can be restored.
    ///
    /// Creations have no prior state and reverts are not themselves revertible.
    pub fn is_revertible(&self) -> bool {
        matches!(
            self,
            AuditAction::Update
                | AuditAction::StatusChange
                | AuditAction::PriceChange
                | AuditAction::InventoryChange
                | AuditAction::Delete
        )
    }
}

/// Immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub campus_id: CampusId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub operator_id: UserId,
    pub action: AuditAction,
    pub before: JsonValue,
    pub after: JsonValue,
    /// Set only on [`AuditAction::Revert`] entries.
    pub reverted_log_id: Option<AuditLogId>,
    /// Batch task that produced the change, if any.
    pub batch_task_id: Option<Uuid>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn from_batch(&self) -> bool {
        self.batch_task_id.is_some()
    }
}

/// Audit entry as submitted to a writer (id and timestamp assigned on write).
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLog {
    pub campus_id: CampusId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub operator_id: UserId,
    pub action: AuditAction,
    pub before: JsonValue,
    pub after: JsonValue,
    pub reverted_log_id: Option<AuditLogId>,
    pub batch_task_id: Option<Uuid>,
    pub remark: Option<String>,
    /// Overrides the write timestamp (imports, replays, tests).
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewAuditLog {
    pub fn new(
        campus_id: CampusId,
        entity_type: EntityType,
        entity_id: EntityId,
        operator_id: UserId,
        action: AuditAction,
        before: JsonValue,
        after: JsonValue,
    ) -> Self {
        Self {
            campus_id,
            entity_type,
            entity_id,
            operator_id,
            action,
            before,
            after,
            reverted_log_id: None,
            batch_task_id: None,
            remark: None,
            occurred_at: None,
        }
    }

    pub fn with_batch_task(mut self, task_id: Uuid) -> Self {
        self.batch_task_id = Some(task_id);
        self
    }

    pub fn reverting(mut self, original: AuditLogId) -> Self {
        self.reverted_log_id = Some(original);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub(crate) fn into_log(self, id: AuditLogId, now: DateTime<Utc>) -> AuditLog {
        AuditLog {
            id,
            campus_id: self.campus_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            operator_id: self.operator_id,
            action: self.action,
            before: self.before,
            after: self.after,
            reverted_log_id: self.reverted_log_id,
            batch_task_id: self.batch_task_id,
            remark: self.remark,
            created_at: self.occurred_at.unwrap_or(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_state_changes_are_revertible() {
        assert!(AuditAction::PriceChange.is_revertible());
        assert!(AuditAction::Delete.is_revertible());
        assert!(!AuditAction::Create.is_revertible());
        assert!(!AuditAction::Revert.is_revertible());
    }

    #[test]
    fn entity_type_serialises_as_snake_case() {
        let json = serde_json::to_string(&EntityType::Goods).unwrap();
        assert_eq!(json, "\"goods\"");
        assert_eq!(EntityType::Order.to_string(), "order");
    }
}
