//! Revert entry point for admin tooling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use bazaar_audit::{AuditLog, AuditLogId, AuditLogReader};

use crate::context::RevertContext;
use crate::error::{RevertError, RevertResult};
use crate::factory::RevertStrategyFactory;
use crate::result::{RevertExecutionResult, RevertValidationResult};
use crate::strategy::{revert_deadline, RevertStrategy};

/// Answer to "can this entry be reverted, and by whom?".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevertPreview {
    pub audit_log_id: AuditLogId,
    pub validation: RevertValidationResult,
    pub requires_approval: bool,
    pub deadline: DateTime<Utc>,
}

pub struct RevertService {
    factory: Arc<RevertStrategyFactory>,
    audit: Arc<dyn AuditLogReader>,
}

impl RevertService {
    pub fn new(factory: Arc<RevertStrategyFactory>, audit: Arc<dyn AuditLogReader>) -> Self {
        Self { factory, audit }
    }

    /// Validate, check approval, execute, then run side effects.
    pub fn revert(&self, audit_log_id: AuditLogId, ctx: &RevertContext) -> RevertResult<RevertExecutionResult> {
        let (log, strategy) = self.load(audit_log_id, ctx)?;

        let validation = strategy.validate_revert(&log, ctx)?;
        if validation.is_error() {
            info!(audit_log_id = %log.id, reason = %validation.message, "revert rejected");
            return Err(RevertError::Validation(validation.message));
        }
        if strategy.requires_approval(&log, ctx) && !ctx.approved {
            return Err(RevertError::ApprovalRequired(format!(
                "{} revert of {} needs sign-off",
                log.entity_type, log.id
            )));
        }
        if validation.is_warning() {
            warn!(audit_log_id = %log.id, warning = %validation.message, "reverting despite newer changes");
        }

        let mut result = strategy.execute_revert(&log, ctx)?;

        match self.audit.find_revert_of(log.id) {
            Ok(Some(revert_log)) => strategy.post_revert_process(&log, &revert_log, &result),
            Ok(None) => warn!(audit_log_id = %log.id, "revert entry missing, skipping side effects"),
            Err(e) => warn!(audit_log_id = %log.id, error = %e, "could not load revert entry"),
        }

        if validation.is_warning() {
            result.warning = Some(validation.message);
        }
        Ok(result)
    }

    /// Validation and approval checks only. Never mutates.
    pub fn preview(&self, audit_log_id: AuditLogId, ctx: &RevertContext) -> RevertResult<RevertPreview> {
        let (log, strategy) = self.load(audit_log_id, ctx)?;
        Ok(RevertPreview {
            audit_log_id,
            validation: strategy.validate_revert(&log, ctx)?,
            requires_approval: strategy.requires_approval(&log, ctx),
            deadline: revert_deadline(&log, strategy.revert_time_limit_days()),
        })
    }

    fn load(&self, audit_log_id: AuditLogId, ctx: &RevertContext) -> RevertResult<(AuditLog, Arc<dyn RevertStrategy>)> {
        let log = self
            .audit
            .find(audit_log_id)?
            .filter(|log| log.campus_id == ctx.campus_id)
            .ok_or(RevertError::NotFound(audit_log_id))?;
        let strategy = self.factory.get_strategy(log.entity_type)?;
        Ok((log, strategy))
    }
}
