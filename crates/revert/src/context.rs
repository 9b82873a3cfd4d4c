use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CampusId, UserId};

/// Who asks for a revert, where, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertContext {
    pub applicant_id: UserId,
    pub campus_id: CampusId,
    /// Reference time for the revert window.
    pub requested_at: DateTime<Utc>,
    /// Set once the separate approval workflow has signed off.
    pub approved: bool,
}

impl RevertContext {
    pub fn new(campus_id: CampusId, applicant_id: UserId) -> Self {
        Self {
            applicant_id,
            campus_id,
            requested_at: Utc::now(),
            approved: false,
        }
    }

    pub fn at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.requested_at = requested_at;
        self
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }
}
