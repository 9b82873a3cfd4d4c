use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use bazaar_audit::{AuditAction, AuditLog, EntityType};
use bazaar_core::ExpectedVersion;
use bazaar_market::{GoodsId, GoodsRepository, GoodsSnapshot, Notification, NotificationKind};

use super::elapsed_ms;
use crate::context::RevertContext;
use crate::error::{RevertError, RevertResult};
use crate::result::{RevertExecutionResult, RevertValidationResult};
use crate::strategy::{check_common, decode_snapshot, drift_result, RevertDeps, RevertStrategy};

pub const GOODS_REVERT_LIMIT_DAYS: i64 = 30;

/// Restores goods status, price and stock.
pub struct GoodsRevertStrategy {
    goods: Arc<dyn GoodsRepository>,
    deps: RevertDeps,
}

impl GoodsRevertStrategy {
    pub fn new(goods: Arc<dyn GoodsRepository>, deps: RevertDeps) -> Self {
        Self { goods, deps }
    }
}

impl RevertStrategy for GoodsRevertStrategy {
    fn supported_entity_type(&self) -> EntityType {
        EntityType::Goods
    }

    fn revert_time_limit_days(&self) -> i64 {
        GOODS_REVERT_LIMIT_DAYS
    }

    fn validate_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertValidationResult> {
        if let Some(failure) = check_common(log, ctx, GOODS_REVERT_LIMIT_DAYS, self.deps.audit_reader.as_ref())? {
            return Ok(failure);
        }

        let Some(goods) = self.goods.find(GoodsId::from(log.entity_id))? else {
            return Ok(RevertValidationResult::error("goods not found"));
        };
        let before: GoodsSnapshot = decode_snapshot(&log.before)?;
        if before.is_empty() {
            return Ok(RevertValidationResult::error("audit entry has nothing to restore"));
        }

        let after: GoodsSnapshot = decode_snapshot(&log.after)?;
        Ok(drift_result(EntityType::Goods, &goods.diverging_fields(&after)))
    }

    fn execute_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertExecutionResult> {
        let started = Instant::now();
        self.deps.ensure_not_reverted(log)?;
        let goods_id = GoodsId::from(log.entity_id);
        let mut goods = self
            .goods
            .find(goods_id)?
            .ok_or_else(|| RevertError::EntityNotFound(format!("goods {goods_id}")))?;

        let target: GoodsSnapshot = decode_snapshot(&log.before)?;
        let current = goods.snapshot_like(&target);
        let expected = ExpectedVersion::Exact(goods.version);
        let prior = goods.clone();

        goods.restore(&target, Utc::now());
        let saved = self.goods.save(&goods, expected)?;
        let revert_log = self.deps.record_or_undo(log, ctx, &current, &target, || {
            self.goods.save(&prior, ExpectedVersion::Exact(saved.version)).map(|_| ())
        })?;

        info!(
            audit_log_id = %log.id,
            revert_log_id = %revert_log.id,
            goods_id = %goods_id,
            "goods change reverted"
        );

        let mut result = RevertExecutionResult::restored(EntityType::Goods, log.entity_id, "goods restored")
            .with_data(json!({
                "restored": target,
                "replaced": current,
                "version": saved.version,
            }))
            .with_revert_log(revert_log.id);
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    fn post_revert_process(&self, original: &AuditLog, _revert_log: &AuditLog, result: &RevertExecutionResult) {
        let goods_id = GoodsId::from(original.entity_id);
        if let Err(e) = self.deps.cache.delete(&bazaar_market::goods::cache_key(goods_id)) {
            warn!(goods_id = %goods_id, error = %e, "cache invalidation after revert failed");
        }

        let seller = match self.goods.find(goods_id) {
            Ok(Some(goods)) => goods.seller_id,
            Ok(None) => return,
            Err(e) => {
                warn!(goods_id = %goods_id, error = %e, "could not load goods for revert notice");
                return;
            }
        };
        let notice = Notification::new(
            seller,
            NotificationKind::Goods,
            "Listing change reverted",
            format!("An administrator reverted a change to your listing: {}", result.message),
        )
        .related(original.entity_id, EntityType::Goods.as_str());
        if let Err(e) = self.deps.notifier.send_notification(notice) {
            warn!(goods_id = %goods_id, error = %e, "revert notice failed");
        }
    }

    /// Undoing someone else's delete or batch change needs sign-off.
    fn requires_approval(&self, log: &AuditLog, ctx: &RevertContext) -> bool {
        ctx.applicant_id != log.operator_id && (log.action == AuditAction::Delete || log.from_batch())
    }
}
