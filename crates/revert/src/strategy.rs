//! Revert strategy contract and the checks every strategy shares.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, warn};

use bazaar_audit::{AuditAction, AuditLog, AuditLogReader, AuditLogWriter, EntityType, NewAuditLog};
use bazaar_market::{CacheInvalidator, NotificationSender, RepositoryError};

use crate::context::RevertContext;
use crate::error::{RevertError, RevertResult};
use crate::result::{RevertExecutionResult, RevertValidationResult};

/// Undo of one audited change for one entity type.
///
/// The service calls `validate_revert`, then `requires_approval`, then
/// `execute_revert`, then `post_revert_process` on success.
pub trait RevertStrategy: Send + Sync {
    fn supported_entity_type(&self) -> EntityType;

    /// Days after the audited change during which it may be reverted.
    fn revert_time_limit_days(&self) -> i64;

    fn validate_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertValidationResult>;

    /// Restore `log.before` and append a revert audit entry.
    fn execute_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertExecutionResult>;

    /// Side effects after a successful revert. Failures are logged only.
    fn post_revert_process(&self, original: &AuditLog, revert_log: &AuditLog, result: &RevertExecutionResult);

    fn requires_approval(&self, log: &AuditLog, ctx: &RevertContext) -> bool;
}

/// Collaborators shared by the revert strategies.
#[derive(Clone)]
pub struct RevertDeps {
    pub audit_reader: Arc<dyn AuditLogReader>,
    pub audit_writer: Arc<dyn AuditLogWriter>,
    pub cache: Arc<dyn CacheInvalidator>,
    pub notifier: Arc<dyn NotificationSender>,
}

impl RevertDeps {
    pub fn new(
        audit_reader: Arc<dyn AuditLogReader>,
        audit_writer: Arc<dyn AuditLogWriter>,
        cache: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            audit_reader,
            audit_writer,
            cache,
            notifier,
        }
    }

    /// Fails with a conflict when `original` was reverted after validation.
    pub(crate) fn ensure_not_reverted(&self, original: &AuditLog) -> RevertResult<()> {
        match self.audit_reader.find_revert_of(original.id)? {
            Some(previous) => Err(RevertError::Conflict(format!(
                "audit log {} already reverted by {}",
                original.id, previous.id
            ))),
            None => Ok(()),
        }
    }

    /// Append the revert entry for an entity already restored. When the
    /// entry cannot be written, `undo` puts the entity back so no restore
    /// exists without its entry.
    pub(crate) fn record_or_undo<B, A, U>(
        &self,
        original: &AuditLog,
        ctx: &RevertContext,
        before: &B,
        after: &A,
        undo: U,
    ) -> RevertResult<AuditLog>
    where
        B: Serialize,
        A: Serialize,
        U: FnOnce() -> Result<(), RepositoryError>,
    {
        match self.record_revert(original, ctx, before, after) {
            Ok(log) => Ok(log),
            Err(e) => {
                match undo() {
                    Ok(()) => warn!(audit_log_id = %original.id, error = %e, "revert entry not written; restore undone"),
                    Err(undo_err) => error!(
                        audit_log_id = %original.id,
                        error = %e,
                        rollback_error = %undo_err,
                        "revert entry not written and restore could not be undone"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Append the entry describing a revert of `original`.
    pub(crate) fn record_revert<B: Serialize, A: Serialize>(
        &self,
        original: &AuditLog,
        ctx: &RevertContext,
        before: &B,
        after: &A,
    ) -> RevertResult<AuditLog> {
        let entry = NewAuditLog::new(
            ctx.campus_id,
            original.entity_type,
            original.entity_id,
            ctx.applicant_id,
            AuditAction::Revert,
            serde_json::to_value(before)?,
            serde_json::to_value(after)?,
        )
        .reverting(original.id)
        .with_remark(format!("revert of {} ({:?})", original.id, original.action));

        Ok(self.audit_writer.log_entity_change(entry)?)
    }
}

/// Last instant at which `log` may still be reverted under `limit_days`.
pub fn revert_deadline(log: &AuditLog, limit_days: i64) -> DateTime<Utc> {
    log.created_at + Duration::days(limit_days)
}

/// Checks that do not depend on the entity: revertible action, not yet
/// reverted, inside the time window. Returns the first failure.
pub fn check_common(
    log: &AuditLog,
    ctx: &RevertContext,
    limit_days: i64,
    audit: &dyn AuditLogReader,
) -> RevertResult<Option<RevertValidationResult>> {
    if !log.action.is_revertible() {
        return Ok(Some(RevertValidationResult::error(format!(
            "{:?} entries cannot be reverted",
            log.action
        ))));
    }

    if let Some(previous) = audit.find_revert_of(log.id)? {
        return Ok(Some(RevertValidationResult::error(format!(
            "already reverted by {}",
            previous.id
        ))));
    }

    if ctx.requested_at > revert_deadline(log, limit_days) {
        return Ok(Some(RevertValidationResult::error(format!(
            "revert window of {limit_days} days has passed"
        ))));
    }

    Ok(None)
}

/// Decode a partial snapshot recorded in an audit entry.
pub fn decode_snapshot<T: DeserializeOwned>(value: &JsonValue) -> RevertResult<T> {
    Ok(serde_json::from_value(value.clone())?)
}

/// WARNING when the entity moved on since the audited change, SUCCESS otherwise.
pub fn drift_result(entity: EntityType, diverging: &[&str]) -> RevertValidationResult {
    if diverging.is_empty() {
        RevertValidationResult::ok()
    } else {
        RevertValidationResult::warning(format!(
            "{entity} changed since the audited operation ({}); reverting overwrites the newer state",
            diverging.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_audit::InMemoryAuditLog;
    use bazaar_core::{CampusId, EntityId, UserId};
    use proptest::prelude::*;
    use serde_json::json;

    fn write(audit: &InMemoryAuditLog, action: AuditAction, at: DateTime<Utc>) -> AuditLog {
        audit
            .log_entity_change(
                NewAuditLog::new(
                    CampusId::new(),
                    EntityType::Goods,
                    EntityId::new(),
                    UserId::new(),
                    action,
                    json!({"price": 100}),
                    json!({"price": 150}),
                )
                .occurred_at(at),
            )
            .unwrap()
    }

    fn ctx_at(log: &AuditLog, at: DateTime<Utc>) -> RevertContext {
        RevertContext::new(log.campus_id, UserId::new()).at(at)
    }

    #[test]
    fn creations_are_not_revertible() {
        let audit = InMemoryAuditLog::new();
        let log = write(&audit, AuditAction::Create, Utc::now());

        let found = check_common(&log, &ctx_at(&log, Utc::now()), 30, &audit).unwrap().unwrap();
        assert!(found.is_error());
    }

    #[test]
    fn second_revert_is_rejected() {
        let audit = InMemoryAuditLog::new();
        let log = write(&audit, AuditAction::PriceChange, Utc::now());
        audit
            .log_entity_change(
                NewAuditLog::new(
                    log.campus_id,
                    log.entity_type,
                    log.entity_id,
                    UserId::new(),
                    AuditAction::Revert,
                    log.after.clone(),
                    log.before.clone(),
                )
                .reverting(log.id),
            )
            .unwrap();

        let found = check_common(&log, &ctx_at(&log, Utc::now()), 30, &audit).unwrap().unwrap();
        assert!(found.message.starts_with("already reverted"));
    }

    #[test]
    fn drift_lists_fields() {
        let r = drift_result(EntityType::Goods, &["price", "stock"]);
        assert!(r.is_warning());
        assert!(r.message.contains("price, stock"));
        assert!(drift_result(EntityType::Goods, &[]).valid);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: the window check passes exactly up to the deadline.
        #[test]
        fn window_is_inclusive(limit_days in 1i64..120, offset_secs in -86_400i64..86_400) {
            let audit = InMemoryAuditLog::new();
            let created = Utc::now() - Duration::days(200);
            let log = write(&audit, AuditAction::StatusChange, created);

            let at = revert_deadline(&log, limit_days) + Duration::seconds(offset_secs);
            let found = check_common(&log, &ctx_at(&log, at), limit_days, &audit).unwrap();
            prop_assert_eq!(found.is_none(), offset_secs <= 0);
        }
    }
}
