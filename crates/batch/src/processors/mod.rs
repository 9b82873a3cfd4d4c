//! Concrete batch processors.
//!
//! Every goods processor follows the same shape: reload the row, recheck the
//! precondition against current state, save under the row's version, append
//! an audit entry with before/after snapshots and drop the cache entry. A
//! change whose audit entry cannot be written is rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, warn};

use bazaar_audit::{AuditAction, AuditLogWriter, EntityType, NewAuditLog};
use bazaar_core::{DomainResult, ExpectedVersion};
use bazaar_market::{
    CacheInvalidator, Goods, GoodsId, GoodsRepository, GoodsSnapshot, NotificationSender,
    RepositoryError, UserRepository,
};

use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError};
use crate::task::BatchTaskItem;

pub mod goods;
pub mod inventory;
pub mod notification;
pub mod price;

pub use goods::{GoodsLifecycleAction, GoodsLifecycleProcessor};
pub use inventory::InventoryUpdateProcessor;
pub use notification::BulkNotificationProcessor;
pub use price::PriceAdjustProcessor;

/// Collaborators shared by the goods processors.
#[derive(Clone)]
pub struct GoodsDeps {
    pub goods: Arc<dyn GoodsRepository>,
    pub cache: Arc<dyn CacheInvalidator>,
    pub audit: Arc<dyn AuditLogWriter>,
}

impl GoodsDeps {
    pub fn new(
        goods: Arc<dyn GoodsRepository>,
        cache: Arc<dyn CacheInvalidator>,
        audit: Arc<dyn AuditLogWriter>,
    ) -> Self {
        Self { goods, cache, audit }
    }
}

/// One processor per batch type, ready for [`crate::processor_registry`].
pub fn standard_processors(
    deps: GoodsDeps,
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn NotificationSender>,
) -> Vec<Arc<dyn BatchProcessor>> {
    vec![
        Arc::new(GoodsLifecycleProcessor::new(GoodsLifecycleAction::Online, deps.clone())),
        Arc::new(GoodsLifecycleProcessor::new(GoodsLifecycleAction::Offline, deps.clone())),
        Arc::new(GoodsLifecycleProcessor::new(GoodsLifecycleAction::Delete, deps.clone())),
        Arc::new(InventoryUpdateProcessor::new(deps.clone())),
        Arc::new(PriceAdjustProcessor::new(deps)),
        Arc::new(BulkNotificationProcessor::new(users, notifier)),
    ]
}

/// A single audited goods mutation.
pub(crate) struct GoodsChange<'a> {
    pub action: AuditAction,
    /// Fields captured in the before/after snapshots.
    pub shape: GoodsSnapshot,
    pub remark: Option<&'a str>,
}

pub(crate) fn apply_goods_change<F>(
    deps: &GoodsDeps,
    cx: &ItemContext,
    item: &BatchTaskItem,
    change: GoodsChange<'_>,
    mutate: F,
) -> Result<ItemOutcome, ProcessorError>
where
    F: FnOnce(&mut Goods, DateTime<Utc>) -> DomainResult<()>,
{
    let goods_id = GoodsId::from(item.target_id);
    let Some(mut goods) = deps.goods.find(goods_id)? else {
        return Ok(ItemOutcome::failed("goods not found"));
    };
    if goods.campus_id != cx.request.campus_id {
        return Ok(ItemOutcome::failed("goods not found"));
    }

    let prior = goods.clone();
    let before = goods.snapshot_like(&change.shape);
    let expected = ExpectedVersion::Exact(goods.version);
    if let Err(e) = mutate(&mut goods, Utc::now()) {
        debug!(task_id = %cx.task_id, goods_id = %goods_id, reason = %e, "goods precondition failed");
        return Ok(ItemOutcome::failed(e.message()));
    }
    let after = goods.snapshot_like(&change.shape);

    let mut entry = NewAuditLog::new(
        cx.request.campus_id,
        EntityType::Goods,
        goods_id.entity_id(),
        cx.request.operator_id,
        change.action,
        serde_json::to_value(&before)?,
        serde_json::to_value(&after)?,
    )
    .with_batch_task(cx.task_id.0);
    if let Some(remark) = change.remark {
        entry = entry.with_remark(remark);
    }

    let saved = match deps.goods.save(&goods, expected) {
        Ok(saved) => saved,
        Err(RepositoryError::Conflict(msg)) => {
            return Ok(ItemOutcome::failed(format!("goods modified concurrently: {msg}")));
        }
        Err(e) => return Err(e.into()),
    };

    let log = match deps.audit.log_entity_change(entry) {
        Ok(log) => log,
        Err(e) => {
            match deps.goods.save(&prior, ExpectedVersion::Exact(saved.version)) {
                Ok(_) => warn!(task_id = %cx.task_id, goods_id = %goods_id, error = %e, "audit write failed; goods change rolled back"),
                Err(undo) => error!(
                    task_id = %cx.task_id,
                    goods_id = %goods_id,
                    error = %e,
                    rollback_error = %undo,
                    "audit write failed and goods change could not be rolled back"
                ),
            }
            return Err(e.into());
        }
    };

    if let Err(e) = deps.cache.delete(&saved.cache_key()) {
        warn!(goods_id = %goods_id, error = %e, "cache invalidation failed");
    }

    Ok(ItemOutcome::succeeded(json!({
        "goods_id": goods_id,
        "audit_log_id": log.id,
        "before": before,
        "after": after,
    })))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bazaar_audit::InMemoryAuditLog;
    use bazaar_core::{CampusId, EntityId, RequestContext, UserId};
    use bazaar_market::{GoodsStatus, InMemoryGoodsRepository, RecordingCache};

    use crate::task::{BatchTaskId, BatchType, NewBatchItem};

    pub(crate) struct Fixture {
        pub ctx: RequestContext,
        pub goods_repo: Arc<InMemoryGoodsRepository>,
        pub cache: Arc<RecordingCache>,
        pub audit: Arc<InMemoryAuditLog>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                ctx: RequestContext::new(CampusId::new(), UserId::new()),
                goods_repo: InMemoryGoodsRepository::arc(),
                cache: RecordingCache::arc(),
                audit: InMemoryAuditLog::arc(),
            }
        }

        pub fn deps(&self) -> GoodsDeps {
            GoodsDeps::new(self.goods_repo.clone(), self.cache.clone(), self.audit.clone())
        }

        pub fn goods(&self, status: GoodsStatus, price: i64, stock: i64) -> Goods {
            let goods = Goods::new(self.ctx.campus_id, UserId::new(), "desk lamp", price, stock)
                .with_status(status);
            self.goods_repo.insert(goods)
        }

        pub fn cx(&self, batch_type: BatchType) -> ItemContext {
            ItemContext {
                request: self.ctx,
                task_id: BatchTaskId::new(),
                batch_type,
            }
        }

        pub fn item(&self, target: EntityId, input: serde_json::Value) -> BatchTaskItem {
            let mut item = BatchTaskItem::new(BatchTaskId::new(), 0, NewBatchItem::new(target, input));
            item.start().unwrap();
            item
        }
    }

    #[test]
    fn cache_outage_does_not_fail_the_item() {
        let fx = Fixture::new();
        fx.cache.set_unavailable(true);
        let goods = fx.goods(GoodsStatus::OnSale, 100, 1);
        let processor = GoodsLifecycleProcessor::new(GoodsLifecycleAction::Offline, fx.deps());

        let item = fx.item(goods.id.entity_id(), serde_json::Value::Null);
        let outcome = processor.process_item(&fx.cx(BatchType::GoodsOffline), &item).unwrap();

        assert!(outcome.success);
        assert_eq!(fx.audit.len(), 1);
    }

    #[test]
    fn audit_outage_rolls_the_goods_change_back() {
        let fx = Fixture::new();
        fx.audit.set_unavailable(true);
        let goods = fx.goods(GoodsStatus::OnSale, 100, 1);
        let processor = GoodsLifecycleProcessor::new(GoodsLifecycleAction::Offline, fx.deps());

        let item = fx.item(goods.id.entity_id(), serde_json::Value::Null);
        let err = processor.process_item(&fx.cx(BatchType::GoodsOffline), &item).unwrap_err();

        assert!(matches!(err, ProcessorError::Audit(_)));
        let stored = fx.goods_repo.find(goods.id).unwrap().unwrap();
        assert_eq!(stored.status, GoodsStatus::OnSale);
        assert!(fx.audit.is_empty());
        assert!(fx.cache.deleted().is_empty());
    }

    #[test]
    fn missing_goods_fails_the_item() {
        let fx = Fixture::new();
        let processor = InventoryUpdateProcessor::new(fx.deps());

        let item = fx.item(EntityId::new(), serde_json::json!({"stock": 1}));
        let outcome = processor.process_item(&fx.cx(BatchType::InventoryUpdate), &item).unwrap();

        assert_eq!(outcome, ItemOutcome::failed("goods not found"));
    }
}
