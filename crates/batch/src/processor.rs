//! Batch processor contract and registry.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use bazaar_audit::AuditError;
use bazaar_core::{RegistryError, RequestContext, StrategyRegistry};
use bazaar_market::{PortError, RepositoryError};

use crate::task::{BatchTaskId, BatchTaskItem, BatchType};

/// Result of processing one item.
///
/// A business-rule violation is an `ItemOutcome` with `success == false`,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub success: bool,
    pub message: String,
    pub data: JsonValue,
}

impl ItemOutcome {
    pub fn succeeded(data: JsonValue) -> Self {
        Self {
            success: true,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: JsonValue::Null,
        }
    }
}

/// Unexpected failure while processing an item. The orchestrator records the
/// item as failed and carries on with its siblings.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("unreadable payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// What a processor knows about the task an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemContext {
    pub request: RequestContext,
    pub task_id: BatchTaskId,
    pub batch_type: BatchType,
}

/// Handler for one [`BatchType`].
pub trait BatchProcessor: Send + Sync {
    fn supported_type(&self) -> BatchType;

    /// Process one item. Must recheck preconditions against current state.
    fn process_item(&self, cx: &ItemContext, item: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError>;
}

pub type ProcessorRegistry = StrategyRegistry<BatchType, Arc<dyn BatchProcessor>>;

/// Index `processors` by batch type. Two processors for one type is an error.
pub fn processor_registry<I>(processors: I) -> Result<ProcessorRegistry, RegistryError>
where
    I: IntoIterator<Item = Arc<dyn BatchProcessor>>,
{
    StrategyRegistry::build("batch-processor", processors, |p| p.supported_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(BatchType);

    impl BatchProcessor for Noop {
        fn supported_type(&self) -> BatchType {
            self.0
        }

        fn process_item(&self, _: &ItemContext, _: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError> {
            Ok(ItemOutcome::succeeded(JsonValue::Null))
        }
    }

    #[test]
    fn duplicate_processor_is_rejected() {
        let processors: Vec<Arc<dyn BatchProcessor>> = vec![
            Arc::new(Noop(BatchType::GoodsOnline)),
            Arc::new(Noop(BatchType::GoodsOnline)),
        ];
        let err = processor_registry(processors).err().unwrap();
        assert_eq!(err, RegistryError::Duplicate("goods_online".to_string()));
    }

    #[test]
    fn unknown_type_names_the_discriminator() {
        let processors: Vec<Arc<dyn BatchProcessor>> = vec![Arc::new(Noop(BatchType::GoodsOnline))];
        let registry = processor_registry(processors).unwrap();

        let err = registry.resolve(&BatchType::PriceAdjust).err().unwrap();
        assert_eq!(err.to_string(), "unsupported type: price_adjust");
        assert_eq!(registry.supported(), vec![BatchType::GoodsOnline]);
    }
}
