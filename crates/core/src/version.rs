//! Optimistic concurrency for mutable entity rows.

use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a save.
///
/// Repositories compare the stored row's version against this before writing,
/// which is what makes "re-read then restore" atomic relative to the current row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (inserts, fixtures).
    Any,
    /// Require the stored row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Row with a monotonically increasing version.
pub trait Versioned {
    fn version(&self) -> u64;
}
