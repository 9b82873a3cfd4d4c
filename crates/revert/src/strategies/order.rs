use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use bazaar_audit::{AuditLog, EntityType};
use bazaar_core::ExpectedVersion;
use bazaar_market::{Notification, NotificationKind, OrderId, OrderRepository, OrderSnapshot};

use super::elapsed_ms;
use crate::context::RevertContext;
use crate::error::{RevertError, RevertResult};
use crate::result::{RevertExecutionResult, RevertValidationResult};
use crate::strategy::{check_common, decode_snapshot, drift_result, RevertDeps, RevertStrategy};

pub const ORDER_REVERT_LIMIT_DAYS: i64 = 7;

/// Restores an order's status.
pub struct OrderRevertStrategy {
    orders: Arc<dyn OrderRepository>,
    deps: RevertDeps,
}

impl OrderRevertStrategy {
    pub fn new(orders: Arc<dyn OrderRepository>, deps: RevertDeps) -> Self {
        Self { orders, deps }
    }
}

impl RevertStrategy for OrderRevertStrategy {
    fn supported_entity_type(&self) -> EntityType {
        EntityType::Order
    }

    fn revert_time_limit_days(&self) -> i64 {
        ORDER_REVERT_LIMIT_DAYS
    }

    fn validate_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertValidationResult> {
        if let Some(failure) = check_common(log, ctx, ORDER_REVERT_LIMIT_DAYS, self.deps.audit_reader.as_ref())? {
            return Ok(failure);
        }

        let Some(order) = self.orders.find(OrderId::from(log.entity_id))? else {
            return Ok(RevertValidationResult::error("order not found"));
        };
        let before: OrderSnapshot = decode_snapshot(&log.before)?;
        if before.status.is_none() {
            return Ok(RevertValidationResult::error("audit entry has nothing to restore"));
        }

        let after: OrderSnapshot = decode_snapshot(&log.after)?;
        let diverging: &[&str] = if after.status.is_some_and(|s| s != order.status) {
            &["status"]
        } else {
            &[]
        };
        Ok(drift_result(EntityType::Order, diverging))
    }

    fn execute_revert(&self, log: &AuditLog, ctx: &RevertContext) -> RevertResult<RevertExecutionResult> {
        let started = Instant::now();
        self.deps.ensure_not_reverted(log)?;
        let order_id = OrderId::from(log.entity_id);
        let mut order = self
            .orders
            .find(order_id)?
            .ok_or_else(|| RevertError::EntityNotFound(format!("order {order_id}")))?;

        let target: OrderSnapshot = decode_snapshot(&log.before)?;
        let current = OrderSnapshot::status(order.status);
        let expected = ExpectedVersion::Exact(order.version);
        let prior = order.clone();

        order.restore(&target, Utc::now());
        let saved = self.orders.save(&order, expected)?;
        let revert_log = self.deps.record_or_undo(log, ctx, &current, &target, || {
            self.orders.save(&prior, ExpectedVersion::Exact(saved.version)).map(|_| ())
        })?;

        info!(audit_log_id = %log.id, revert_log_id = %revert_log.id, order_id = %order_id, "order change reverted");

        let mut result = RevertExecutionResult::restored(EntityType::Order, log.entity_id, "order status restored")
            .with_data(json!({ "restored": target, "replaced": current }))
            .with_revert_log(revert_log.id);
        result.duration_ms = elapsed_ms(started);
        Ok(result)
    }

    fn post_revert_process(&self, original: &AuditLog, _revert_log: &AuditLog, _result: &RevertExecutionResult) {
        let order_id = OrderId::from(original.entity_id);
        if let Err(e) = self.deps.cache.delete(&bazaar_market::order::cache_key(order_id)) {
            warn!(order_id = %order_id, error = %e, "cache invalidation after revert failed");
        }

        let order = match self.orders.find(order_id) {
            Ok(Some(order)) => order,
            Ok(None) => return,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "could not load order for revert notice");
                return;
            }
        };
        let notice = Notification::new(
            order.buyer_id,
            NotificationKind::Order,
            "Order status restored",
            format!("Your order is back to {:?}.", order.status),
        )
        .related(original.entity_id, EntityType::Order.as_str());
        if let Err(e) = self.deps.notifier.send_notification(notice) {
            warn!(order_id = %order_id, error = %e, "revert notice failed");
        }
    }

    fn requires_approval(&self, log: &AuditLog, ctx: &RevertContext) -> bool {
        ctx.applicant_id != log.operator_id
    }
}
