use serde::Deserialize;

use bazaar_audit::AuditAction;
use bazaar_market::GoodsSnapshot;

use super::{apply_goods_change, GoodsChange, GoodsDeps};
use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError};
use crate::task::{BatchTaskItem, BatchType};

#[derive(Debug, Deserialize)]
struct PricePayload {
    /// New price in cents.
    price: i64,
}

/// Sets a new price, rejecting changes larger than the configured cap.
pub struct PriceAdjustProcessor {
    deps: GoodsDeps,
}

impl PriceAdjustProcessor {
    pub fn new(deps: GoodsDeps) -> Self {
        Self { deps }
    }
}

impl BatchProcessor for PriceAdjustProcessor {
    fn supported_type(&self) -> BatchType {
        BatchType::PriceAdjust
    }

    fn process_item(&self, cx: &ItemContext, item: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError> {
        let payload: PricePayload = item.payload()?;
        let change = GoodsChange {
            action: AuditAction::PriceChange,
            shape: GoodsSnapshot::price(0),
            remark: None,
        };
        apply_goods_change(&self.deps, cx, item, change, |goods, now| {
            goods.adjust_price(payload.price, now)
        })
    }
}
