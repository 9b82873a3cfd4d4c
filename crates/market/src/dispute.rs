use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CampusId, DomainError, DomainResult, EntityId, UserId, Versioned};

use crate::order::OrderId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisputeId(pub EntityId);

impl DisputeId {
    pub fn new() -> Self {
        Self(EntityId::new())
    }
}

impl Default for DisputeId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DisputeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// After-sale dispute lifecycle: buyer and seller negotiate first, then the
/// platform arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Negotiating,
    Arbitrating,
    Resolved,
    Withdrawn,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub campus_id: CampusId,
    pub order_id: OrderId,
    pub initiator_id: UserId,
    pub respondent_id: UserId,
    pub status: DisputeStatus,
    pub status_changed_at: DateTime<Utc>,
    pub version: u64,
}

impl Dispute {
    pub fn open(
        campus_id: CampusId,
        order_id: OrderId,
        initiator_id: UserId,
        respondent_id: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DisputeId::new(),
            campus_id,
            order_id,
            initiator_id,
            respondent_id,
            status: DisputeStatus::Negotiating,
            status_changed_at: at,
            version: 0,
        }
    }

    /// Negotiation window expired without agreement.
    pub fn escalate_to_arbitration(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DisputeStatus::Negotiating {
            return Err(DomainError::invariant(format!(
                "dispute in {:?} cannot be escalated",
                self.status
            )));
        }
        self.status = DisputeStatus::Arbitrating;
        self.status_changed_at = at;
        Ok(())
    }

    /// Arbitration window expired without a ruling.
    pub fn time_out(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DisputeStatus::Arbitrating {
            return Err(DomainError::invariant(format!(
                "dispute in {:?} cannot time out",
                self.status
            )));
        }
        self.status = DisputeStatus::TimedOut;
        self.status_changed_at = at;
        Ok(())
    }
}

impl Versioned for Dispute {
    fn version(&self) -> u64 {
        self.version
    }
}
