//! `bazaar-revert`: undo of individually audited changes.
//!
//! Each [`RevertStrategy`] handles one entity type: it validates that an
//! audit entry may still be reverted, restores the entry's `before`
//! snapshot under optimistic concurrency, and appends a revert entry that
//! references the original.

pub mod context;
pub mod error;
pub mod factory;
pub mod result;
pub mod service;
pub mod strategies;
pub mod strategy;

use std::sync::Arc;

use bazaar_market::{GoodsRepository, OrderRepository, UserRepository};

pub use context::RevertContext;
pub use error::{RevertError, RevertResult};
pub use factory::RevertStrategyFactory;
pub use result::{RevertExecutionResult, RevertSeverity, RevertValidationResult};
pub use service::{RevertPreview, RevertService};
pub use strategies::{GoodsRevertStrategy, OrderRevertStrategy, UserRevertStrategy};
pub use strategy::{RevertDeps, RevertStrategy};

/// Goods, order and user strategies, ready for [`RevertStrategyFactory::new`].
pub fn standard_strategies(
    goods: Arc<dyn GoodsRepository>,
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    deps: RevertDeps,
) -> Vec<Arc<dyn RevertStrategy>> {
    vec![
        Arc::new(GoodsRevertStrategy::new(goods, deps.clone())),
        Arc::new(OrderRevertStrategy::new(orders, deps.clone())),
        Arc::new(UserRevertStrategy::new(users, deps)),
    ]
}
