//! Audit trail consumed by the revert engine.
//!
//! Every state-changing operation (batch-driven or direct) appends an
//! [`AuditLog`] with before/after snapshots. Entries are immutable once
//! written; the revert engine treats them as the single source of truth.

pub mod log;
pub mod store;

pub use log::{AuditAction, AuditLog, AuditLogId, EntityType, NewAuditLog};
pub use store::{AuditError, AuditLogReader, AuditLogWriter, InMemoryAuditLog};
