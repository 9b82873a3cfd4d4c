use serde::Deserialize;

use bazaar_audit::AuditAction;
use bazaar_market::GoodsSnapshot;

use super::{apply_goods_change, GoodsChange, GoodsDeps};
use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError};
use crate::task::{BatchTaskItem, BatchType};

#[derive(Debug, Deserialize)]
struct StockPayload {
    stock: i64,
}

/// Sets the absolute stock level of each goods item.
pub struct InventoryUpdateProcessor {
    deps: GoodsDeps,
}

impl InventoryUpdateProcessor {
    pub fn new(deps: GoodsDeps) -> Self {
        Self { deps }
    }
}

impl BatchProcessor for InventoryUpdateProcessor {
    fn supported_type(&self) -> BatchType {
        BatchType::InventoryUpdate
    }

    fn process_item(&self, cx: &ItemContext, item: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError> {
        let payload: StockPayload = item.payload()?;
        let change = GoodsChange {
            action: AuditAction::InventoryChange,
            shape: GoodsSnapshot::stock(0),
            remark: None,
        };
        apply_goods_change(&self.deps, cx, item, change, |goods, now| {
            goods.set_stock(payload.stock, now)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::tests::Fixture;
    use bazaar_market::{GoodsRepository, GoodsStatus};

    #[test]
    fn negative_stock_is_rejected() {
        let fx = Fixture::new();
        let goods = fx.goods(GoodsStatus::OnSale, 100, 5);
        let processor = InventoryUpdateProcessor::new(fx.deps());

        let item = fx.item(goods.id.entity_id(), serde_json::json!({"stock": -1}));
        let outcome = processor.process_item(&fx.cx(BatchType::InventoryUpdate), &item).unwrap();

        assert_eq!(outcome, ItemOutcome::failed("stock must be non-negative"));
        assert_eq!(fx.goods_repo.find(goods.id).unwrap().unwrap().stock, 5);
    }

    #[test]
    fn stock_snapshot_only_carries_stock() {
        let fx = Fixture::new();
        let goods = fx.goods(GoodsStatus::OnSale, 100, 5);
        let processor = InventoryUpdateProcessor::new(fx.deps());

        let item = fx.item(goods.id.entity_id(), serde_json::json!({"stock": 12}));
        processor.process_item(&fx.cx(BatchType::InventoryUpdate), &item).unwrap();

        let log = &fx.audit.all()[0];
        assert_eq!(log.before, serde_json::json!({"stock": 5}));
        assert_eq!(log.after, serde_json::json!({"stock": 12}));
    }

    #[test]
    fn missing_stock_field_is_a_payload_error() {
        let fx = Fixture::new();
        let goods = fx.goods(GoodsStatus::OnSale, 100, 5);
        let processor = InventoryUpdateProcessor::new(fx.deps());

        let item = fx.item(goods.id.entity_id(), serde_json::json!({"qty": 3}));
        let err = processor
            .process_item(&fx.cx(BatchType::InventoryUpdate), &item)
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Payload(_)));
    }
}
