//! `bazaar-core`: building blocks shared by the batch and revert engines.
//!
//! Pure types only: identifiers, the domain error, optimistic concurrency,
//! the explicit request context and the generic strategy registry.

pub mod context;
pub mod error;
pub mod id;
pub mod registry;
pub mod version;

pub use context::RequestContext;
pub use error::{DomainError, DomainResult};
pub use id::{CampusId, EntityId, UserId};
pub use registry::{RegistryError, StrategyRegistry};
pub use version::{ExpectedVersion, Versioned};
