use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use bazaar_audit::{AuditLog, EntityType};
use bazaar_core::{ExpectedVersion, UserId};
use bazaar_market::{Notification, NotificationKind, UserRepository, UserSnapshot};

use super::elapsed_ms;
use crate::context::RevertContext;
use crate::error::{RevertError, RevertResult};
use crate::result::{RevertExecutionResult, RevertValidationResult};
use crate::strategy::{check_common, decode_snapshot, drift_result, RevertDeps, RevertStrategy};

pub const USER_REVERT_LIMIT_DAYS: i64 = 90;

/// Restores an account status (ban / unban).
pub struct UserRevertStrategy {
    users: Arc<dyn UserRepository>,
    deps: RevertDeps,
}

impl UserRevertStrategy {
    pub fn new(users: Arc<dyn UserRepository>, deps: RevertDeps) -> Self {
        Self { users, deps }
    }
}

impl RevertStrategy for UserRevertStrategy {
    fn supported_entity_type(&self) -> EntityType {
        EntityType::User
    }

    fn revert_time_limit_days(&self) -> i64 {
        USER_REVERT_LIMIT_DAYS
    }

    fn validate_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertValidationResult> {
        if let Some(failure) = check_common(log, ctx, USER_REVERT_LIMIT_DAYS, self.deps.audit_reader.as_ref())? {
            return Ok(failure);
        }

        let Some(user) = self.users.find(UserId::from(log.entity_id))? else {
            return Ok(RevertValidationResult::error("user not found"));
        };
        if user.anonymized {
            return Ok(RevertValidationResult::error("user data has been purged"));
        }
        let before: UserSnapshot = decode_snapshot(&log.before)?;
        if before.status.is_none() {
            return Ok(RevertValidationResult::error("audit entry has nothing to restore"));
        }

        let after: UserSnapshot = decode_snapshot(&log.after)?;
        let diverging: &[&str] = if after.status.is_some_and(|s| s != user.status) {
            &["status"]
        } else {
            &[]
        };
        Ok(drift_result(EntityType::User, diverging))
    }

    fn execute_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertExecutionResult> {
        let started = Instant::now();
        self.deps.ensure_not_reverted(log)?;
        let user_id = UserId::from(log.entity_id);
        let mut user = self
            .users
            .find(user_id)?
            .ok_or_else(|| RevertError::EntityNotFound(format!("user {user_id}")))?;

        let target: UserSnapshot = decode_snapshot(&log.before)?;
        let current = UserSnapshot::status(user.status);
        let expected = ExpectedVersion::Exact(user.version);
        let prior = user.clone();

        user.restore(&target, Utc::now());
        let saved = self.users.save(&user, expected)?;
        let revert_log = self.deps.record_or_undo(log, ctx, &current, &target, || {
            self.users.save(&prior, ExpectedVersion::Exact(saved.version)).map(|_| ())
        })?;

        info!(audit_log_id = %log.id, revert_log_id = %revert_log.id, user_id = %user_id, "account change reverted");

        let mut result = RevertExecutionResult::restored(EntityType::User, log.entity_id, "account status restored")
            .with_data(json!({ "restored": target, "replaced": current }))
            .with_revert_log(revert_log.id);
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    fn post_revert_process(&self, original: &AuditLog, _revert_log: &AuditLog, _result: &RevertExecutionResult) {
        let user_id = UserId::from(original.entity_id);
        if let Err(e) = self.deps.cache.delete(&bazaar_market::user::cache_key(user_id)) {
            warn!(user_id = %user_id, error = %e, "cache invalidation after revert failed");
        }

        let notice = Notification::new(
            user_id,
            NotificationKind::Account,
            "Account status restored",
            "An administrator restored your previous account status.",
        );
        if let Err(e) = self.deps.notifier.send_notification(notice) {
            warn!(user_id = %user_id, error = %e, "revert notice failed");
        }
    }

    /// Account changes always go through approval.
    fn requires_approval(&self, _log: &AuditLog, _ctx: &RevertContext) -> bool {
        true
    }
}
