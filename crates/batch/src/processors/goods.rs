use serde::Deserialize;

use bazaar_audit::AuditAction;
use bazaar_market::{GoodsSnapshot, GoodsStatus};

use super::{apply_goods_change, GoodsChange, GoodsDeps};
use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError};
use crate::task::{BatchTaskItem, BatchType};

/// Listing lifecycle transition applied by a [`GoodsLifecycleProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoodsLifecycleAction {
    Online,
    Offline,
    Delete,
}

impl GoodsLifecycleAction {
    fn batch_type(self) -> BatchType {
        match self {
            GoodsLifecycleAction::Online => BatchType::GoodsOnline,
            GoodsLifecycleAction::Offline => BatchType::GoodsOffline,
            GoodsLifecycleAction::Delete => BatchType::GoodsDelete,
        }
    }

    fn audit_action(self) -> AuditAction {
        match self {
            GoodsLifecycleAction::Delete => AuditAction::Delete,
            _ => AuditAction::StatusChange,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LifecyclePayload {
    #[serde(default)]
    reason: Option<String>,
}

/// Puts goods online, takes them offline or soft-deletes them.
pub struct GoodsLifecycleProcessor {
    action: GoodsLifecycleAction,
    deps: GoodsDeps,
}

impl GoodsLifecycleProcessor {
    pub fn new(action: GoodsLifecycleAction, deps: GoodsDeps) -> Self {
        Self { action, deps }
    }
}

impl BatchProcessor for GoodsLifecycleProcessor {
    fn supported_type(&self) -> BatchType {
        self.action.batch_type()
    }

    fn process_item(&self, cx: &ItemContext, item: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError> {
        let payload: LifecyclePayload = item.payload_or_default()?;
        let change = GoodsChange {
            action: self.action.audit_action(),
            shape: GoodsSnapshot::status(GoodsStatus::OnSale),
            remark: payload.reason.as_deref(),
        };

        let action = self.action;
        apply_goods_change(&self.deps, cx, item, change, |goods, now| match action {
            GoodsLifecycleAction::Online => goods.put_online(now),
            GoodsLifecycleAction::Offline => goods.take_offline(now),
            GoodsLifecycleAction::Delete => goods.mark_deleted(now),
        })
    }
}
