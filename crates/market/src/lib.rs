//! Marketplace entities the batch/revert engine touches, plus the collaborator
//! ports it consumes.
//!
//! Persistence, caching, notification delivery and logistics lookups live
//! outside the engine. This crate only defines their interfaces and ships
//! in-memory implementations for tests/dev wiring.

pub mod dispute;
pub mod goods;
pub mod memory;
pub mod order;
pub mod ports;
pub mod user;

pub use dispute::{Dispute, DisputeId, DisputeStatus};
pub use goods::{Goods, GoodsId, GoodsSnapshot, GoodsStatus};
pub use memory::{
    InMemoryDisputeRepository, InMemoryGoodsRepository, InMemoryOrderRepository,
    InMemoryUserRepository, RecordingCache, RecordingNotifier, StaticLogisticsTracker,
};
pub use order::{Order, OrderId, OrderSnapshot, OrderStatus};
pub use ports::{
    CacheInvalidator, DisputeRepository, GoodsRepository, LogisticsTracker, Notification,
    NotificationKind, NotificationSender, OrderRepository, PortError, RepositoryError,
    TrackingStatus, UserRepository,
};
pub use user::{AccountStatus, User, UserSnapshot};
