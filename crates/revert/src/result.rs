//! Revert validation and execution results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bazaar_audit::{AuditLogId, EntityType};
use bazaar_core::EntityId;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevertSeverity {
    Success,
    /// The revert may proceed, but the caller should see the message.
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertValidationResult {
    pub valid: bool,
    pub message: String,
    pub level: RevertSeverity,
}

impl RevertValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            message: "revert allowed".to_string(),
            level: RevertSeverity::Success,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
            level: RevertSeverity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            level: RevertSeverity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == RevertSeverity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.level == RevertSeverity::Warning
    }
}

/// What an executed revert restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertExecutionResult {
    pub success: bool,
    pub message: String,
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub duration_ms: u64,
    pub data: JsonValue,
    /// Audit entry recording the revert itself.
    pub revert_log_id: Option<AuditLogId>,
    /// Warning-level validation message carried forward, if any.
    pub warning: Option<String>,
}

impl RevertExecutionResult {
    pub fn restored(entity_type: EntityType, entity_id: EntityId, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            entity_id,
            entity_type,
            duration_ms: 0,
            data: JsonValue::Null,
            revert_log_id: None,
            warning: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn with_revert_log(mut self, id: AuditLogId) -> Self {
        self.revert_log_id = Some(id);
        self
    }
}
