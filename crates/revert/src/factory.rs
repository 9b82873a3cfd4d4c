//! Entity type → revert strategy resolution.

use std::sync::Arc;

use bazaar_audit::EntityType;
use bazaar_core::{RegistryError, StrategyRegistry};

use crate::strategy::RevertStrategy;

/// Registry of revert strategies keyed by the entity type they handle.
pub struct RevertStrategyFactory {
    registry: StrategyRegistry<EntityType, Arc<dyn RevertStrategy>>,
}

impl RevertStrategyFactory {
    /// Fails if two strategies claim the same entity type.
    pub fn new<I>(strategies: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn RevertStrategy>>,
    {
        let registry = StrategyRegistry::build("revert-strategy", strategies, |s| s.supported_entity_type())?;
        Ok(Self { registry })
    }

    pub fn get_strategy(&self, entity_type: EntityType) -> Result<Arc<dyn RevertStrategy>, RegistryError> {
        self.registry.resolve(&entity_type).cloned()
    }

    pub fn is_supported(&self, entity_type: EntityType) -> bool {
        self.registry.is_supported(&entity_type)
    }

    pub fn supported_entity_types(&self) -> Vec<EntityType> {
        self.registry.supported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_audit::AuditLog;

    use crate::context::RevertContext;
    use crate::error::RevertResult;
    use crate::result::{RevertExecutionResult, RevertValidationResult};

    struct Stub(EntityType);

    impl RevertStrategy for Stub {
        fn supported_entity_type(&self) -> EntityType {
            self.0
        }

        fn revert_time_limit_days(&self) -> i64 {
            1
        }

        fn validate_revert(&self, _: &AuditLog, _: &RevertContext) -> RevertResult<RevertValidationResult> {
            Ok(RevertValidationResult::ok())
        }

        fn execute_revert(&self, log: &AuditLog, _: &RevertContext) -> RevertResult<RevertExecutionResult> {
            Ok(RevertExecutionResult::restored(self.0, log.entity_id, "ok"))
        }

        fn post_revert_process(&self, _: &AuditLog, _: &AuditLog, _: &RevertExecutionResult) {}

        fn requires_approval(&self, _: &AuditLog, _: &RevertContext) -> bool {
            false
        }
    }

    #[test]
    fn resolves_by_entity_type() {
        let factory = RevertStrategyFactory::new(vec![
            Arc::new(Stub(EntityType::User)) as Arc<dyn RevertStrategy>,
            Arc::new(Stub(EntityType::Goods)),
        ])
        .unwrap();

        assert!(factory.is_supported(EntityType::Goods));
        assert_eq!(factory.supported_entity_types(), vec![EntityType::Goods, EntityType::User]);
        assert_eq!(
            factory.get_strategy(EntityType::Dispute).err(),
            Some(RegistryError::Unsupported("dispute".to_string()))
        );
    }

    #[test]
    fn collision_is_fatal() {
        let result = RevertStrategyFactory::new(vec![
            Arc::new(Stub(EntityType::Order)) as Arc<dyn RevertStrategy>,
            Arc::new(Stub(EntityType::Order)),
        ]);
        assert_eq!(result.err(), Some(RegistryError::Duplicate("order".to_string())));
    }
}
