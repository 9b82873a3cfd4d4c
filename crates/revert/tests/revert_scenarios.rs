//! Revert flows against the in-memory collaborators.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use bazaar_audit::{
    AuditAction, AuditError, AuditLog, AuditLogId, AuditLogReader, AuditLogWriter, EntityType, InMemoryAuditLog,
    NewAuditLog,
};
use bazaar_core::{CampusId, EntityId, UserId};
use bazaar_market::{
    AccountStatus, Goods, GoodsRepository, GoodsStatus, InMemoryGoodsRepository, InMemoryOrderRepository,
    InMemoryUserRepository, Order, OrderRepository, OrderStatus, RecordingCache, RecordingNotifier, User,
    UserRepository,
};
use bazaar_revert::{
    standard_strategies, GoodsRevertStrategy, RevertContext, RevertDeps, RevertError, RevertService,
    RevertSeverity, RevertStrategy, RevertStrategyFactory,
};
use uuid::Uuid;

struct Harness {
    campus: CampusId,
    operator: UserId,
    goods: Arc<InMemoryGoodsRepository>,
    orders: Arc<InMemoryOrderRepository>,
    users: Arc<InMemoryUserRepository>,
    audit: Arc<InMemoryAuditLog>,
    cache: Arc<RecordingCache>,
    notifier: Arc<RecordingNotifier>,
    service: RevertService,
}

impl Harness {
    fn new() -> Self {
        let goods = InMemoryGoodsRepository::arc();
        let orders = InMemoryOrderRepository::arc();
        let users = InMemoryUserRepository::arc();
        let audit = InMemoryAuditLog::arc();
        let cache = RecordingCache::arc();
        let notifier = RecordingNotifier::arc();

        let deps = RevertDeps::new(audit.clone(), audit.clone(), cache.clone(), notifier.clone());
        let factory = RevertStrategyFactory::new(standard_strategies(
            goods.clone(),
            orders.clone(),
            users.clone(),
            deps,
        ))
        .unwrap();

        Self {
            campus: CampusId::new(),
            operator: UserId::new(),
            service: RevertService::new(Arc::new(factory), audit.clone()),
            goods,
            orders,
            users,
            audit,
            cache,
            notifier,
        }
    }

    fn ctx(&self) -> RevertContext {
        RevertContext::new(self.campus, self.operator)
    }

    /// Goods priced `after`, with an audit entry recording the change from `before`.
    fn priced_goods(&self, before: i64, after: i64, at: DateTime<Utc>) -> (Goods, AuditLog) {
        let goods = self.goods.insert(
            Goods::new(self.campus, UserId::new(), "bike", after, 1).with_status(GoodsStatus::OnSale),
        );
        let log = self
            .audit
            .log_entity_change(
                NewAuditLog::new(
                    self.campus,
                    EntityType::Goods,
                    goods.id.entity_id(),
                    self.operator,
                    AuditAction::PriceChange,
                    json!({"price": before}),
                    json!({"price": after}),
                )
                .occurred_at(at),
            )
            .unwrap();
        (goods, log)
    }
}

#[test]
fn price_revert_restores_before_snapshot_and_references_original() {
    let h = Harness::new();
    let (goods, log) = h.priced_goods(100, 150, Utc::now());

    let result = h.service.revert(log.id, &h.ctx()).unwrap();

    assert!(result.success);
    assert!(result.warning.is_none());
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().price, 100);

    let revert_log = h.audit.find_revert_of(log.id).unwrap().unwrap();
    assert_eq!(Some(revert_log.id), result.revert_log_id);
    assert_eq!(revert_log.action, AuditAction::Revert);
    assert_eq!(revert_log.reverted_log_id, Some(log.id));
    assert_eq!(revert_log.before, json!({"price": 150}));
    assert_eq!(revert_log.after, json!({"price": 100}));

    assert_eq!(h.cache.deleted(), vec![goods.cache_key()]);
    assert_eq!(h.notifier.sent_to(goods.seller_id).len(), 1);
}

#[test]
fn revert_window_boundary() {
    let h = Harness::new();
    let now = Utc::now();

    let (late_goods, late) = h.priced_goods(100, 150, now - Duration::days(30) - Duration::seconds(1));
    let err = h.service.revert(late.id, &h.ctx().at(now)).unwrap_err();
    assert!(matches!(err, RevertError::Validation(ref msg) if msg.contains("30 days")));
    assert_eq!(h.goods.find(late_goods.id).unwrap().unwrap().price, 150);
    assert!(h.audit.find_revert_of(late.id).unwrap().is_none());

    let (fresh_goods, fresh) = h.priced_goods(100, 150, now - Duration::days(30) + Duration::seconds(1));
    h.service.revert(fresh.id, &h.ctx().at(now)).unwrap();
    assert_eq!(h.goods.find(fresh_goods.id).unwrap().unwrap().price, 100);
}

#[test]
fn second_revert_is_rejected() {
    let h = Harness::new();
    let (_, log) = h.priced_goods(100, 150, Utc::now());

    h.service.revert(log.id, &h.ctx()).unwrap();
    let err = h.service.revert(log.id, &h.ctx()).unwrap_err();

    assert!(matches!(err, RevertError::Validation(ref msg) if msg.starts_with("already reverted")));
    assert_eq!(h.audit.len(), 2);
}

impl Harness {
    fn goods_strategy(&self, reader: Arc<dyn AuditLogReader>) -> GoodsRevertStrategy {
        GoodsRevertStrategy::new(
            self.goods.clone(),
            RevertDeps::new(reader, self.audit.clone(), self.cache.clone(), self.notifier.clone()),
        )
    }
}

/// Reader that never sees revert entries, as a lagging replica would.
struct LaggingReader(Arc<InMemoryAuditLog>);

impl AuditLogReader for LaggingReader {
    fn find(&self, id: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        self.0.find(id)
    }

    fn find_revert_of(&self, _: AuditLogId) -> Result<Option<AuditLog>, AuditError> {
        Ok(None)
    }

    fn list_for_entity(&self, entity_type: EntityType, entity_id: EntityId) -> Result<Vec<AuditLog>, AuditError> {
        self.0.list_for_entity(entity_type, entity_id)
    }
}

#[test]
fn interleaved_reverts_of_one_entry_restore_once() {
    let h = Harness::new();
    let (goods, log) = h.priced_goods(100, 150, Utc::now());
    let strategy = h.goods_strategy(h.audit.clone());
    let ctx = h.ctx();

    assert!(strategy.validate_revert(&log, &ctx).unwrap().valid);
    assert!(strategy.validate_revert(&log, &ctx).unwrap().valid);

    strategy.execute_revert(&log, &ctx).unwrap();
    let err = strategy.execute_revert(&log, &ctx).unwrap_err();

    assert!(matches!(err, RevertError::Conflict(ref msg) if msg.contains("already reverted")));
    assert_eq!(h.audit.len(), 2);
    let stored = h.goods.find(goods.id).unwrap().unwrap();
    assert_eq!(stored.price, 100);
    assert_eq!(stored.version, goods.version + 1);
}

#[test]
fn duplicate_revert_entry_is_refused_by_the_writer() {
    let h = Harness::new();
    let (goods, log) = h.priced_goods(100, 150, Utc::now());
    let strategy = h.goods_strategy(Arc::new(LaggingReader(h.audit.clone())));
    let ctx = h.ctx();

    strategy.execute_revert(&log, &ctx).unwrap();
    let err = strategy.execute_revert(&log, &ctx).unwrap_err();

    assert!(matches!(err, RevertError::Conflict(ref msg) if msg.contains("already reverted")));
    assert_eq!(h.audit.len(), 2);
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().price, 100);
}

#[test]
fn audit_outage_leaves_the_entity_untouched() {
    let h = Harness::new();
    let (goods, log) = h.priced_goods(100, 150, Utc::now());
    h.audit.set_unavailable(true);

    let err = h.service.revert(log.id, &h.ctx());
    assert!(err.is_err());
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().price, 150);

    h.audit.set_unavailable(false);
    assert!(h.audit.find_revert_of(log.id).unwrap().is_none());
    h.service.revert(log.id, &h.ctx()).unwrap();
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().price, 100);
}

#[test]
fn drifted_state_reverts_with_warning() {
    let h = Harness::new();
    let (mut goods, log) = h.priced_goods(100, 150, Utc::now());
    goods.price = 180;
    h.goods.insert(goods.clone());

    let result = h.service.revert(log.id, &h.ctx()).unwrap();

    assert!(result.warning.as_deref().unwrap().contains("price"));
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().price, 100);
}

#[test]
fn batch_change_by_another_operator_needs_approval() {
    let h = Harness::new();
    let goods = h.goods.insert(Goods::new(h.campus, UserId::new(), "lamp", 100, 1).with_status(GoodsStatus::Offline));
    let log = h
        .audit
        .log_entity_change(
            NewAuditLog::new(
                h.campus,
                EntityType::Goods,
                goods.id.entity_id(),
                UserId::new(),
                AuditAction::StatusChange,
                json!({"status": "on_sale"}),
                json!({"status": "offline"}),
            )
            .with_batch_task(Uuid::now_v7()),
        )
        .unwrap();

    let preview = h.service.preview(log.id, &h.ctx()).unwrap();
    assert!(preview.requires_approval);
    assert_eq!(preview.validation.level, RevertSeverity::Success);

    let err = h.service.revert(log.id, &h.ctx()).unwrap_err();
    assert!(matches!(err, RevertError::ApprovalRequired(_)));
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().status, GoodsStatus::Offline);

    h.service.revert(log.id, &h.ctx().approved()).unwrap();
    assert_eq!(h.goods.find(goods.id).unwrap().unwrap().status, GoodsStatus::OnSale);
}

#[test]
fn order_status_revert_notifies_buyer() {
    let h = Harness::new();
    let mut order = Order::new(h.campus, UserId::new(), UserId::new(), bazaar_market::GoodsId::new(), 2_500);
    order.status = OrderStatus::Cancelled;
    let order = h.orders.insert(order);
    let log = h
        .audit
        .log_entity_change(NewAuditLog::new(
            h.campus,
            EntityType::Order,
            order.id.entity_id(),
            h.operator,
            AuditAction::StatusChange,
            json!({"status": "paid"}),
            json!({"status": "cancelled"}),
        ))
        .unwrap();

    h.service.revert(log.id, &h.ctx()).unwrap();

    assert_eq!(h.orders.find(order.id).unwrap().unwrap().status, OrderStatus::Paid);
    assert_eq!(h.notifier.sent_to(order.buyer_id).len(), 1);
}

#[test]
fn unban_always_needs_approval() {
    let h = Harness::new();
    let mut user = User::new(h.campus, "carol");
    user.status = AccountStatus::Banned;
    let user = h.users.insert(user);
    let log = h
        .audit
        .log_entity_change(NewAuditLog::new(
            h.campus,
            EntityType::User,
            user.id.into(),
            h.operator,
            AuditAction::StatusChange,
            json!({"status": "active"}),
            json!({"status": "banned"}),
        ))
        .unwrap();

    assert!(matches!(
        h.service.revert(log.id, &h.ctx()),
        Err(RevertError::ApprovalRequired(_))
    ));

    h.service.revert(log.id, &h.ctx().approved()).unwrap();
    assert_eq!(h.users.find(user.id).unwrap().unwrap().status, AccountStatus::Active);
}

#[test]
fn unsupported_entity_type_is_a_configuration_error() {
    let h = Harness::new();
    let log = h
        .audit
        .log_entity_change(NewAuditLog::new(
            h.campus,
            EntityType::Dispute,
            bazaar_core::EntityId::new(),
            h.operator,
            AuditAction::StatusChange,
            json!({"status": "negotiating"}),
            json!({"status": "arbitrating"}),
        ))
        .unwrap();

    let err = h.service.revert(log.id, &h.ctx()).unwrap_err();
    assert_eq!(err.to_string(), "configuration error: unsupported type: dispute");
}

#[test]
fn entries_from_another_campus_are_not_found() {
    let h = Harness::new();
    let (_, log) = h.priced_goods(100, 150, Utc::now());
    let outsider = RevertContext::new(CampusId::new(), h.operator);

    assert!(matches!(
        h.service.revert(log.id, &outsider),
        Err(RevertError::NotFound(id)) if id == log.id
    ));
}
