use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CampusId, DomainError, DomainResult, EntityId, UserId, Versioned};

use crate::goods::GoodsId;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub EntityId);

impl OrderId {
    pub fn new() -> Self {
        Self(EntityId::new())
    }

    pub fn entity_id(&self) -> EntityId {
        self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<EntityId> for OrderId {
    fn from(value: EntityId) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunding,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub campus_id: CampusId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub goods_id: GoodsId,
    pub amount: i64,
    pub status: OrderStatus,
    pub tracking_no: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set by abnormal-order detection; cleared only by an operator.
    pub abnormal: bool,
    pub abnormal_reason: Option<String>,
    /// Last carrier query that did not report delivery.
    #[serde(default)]
    pub tracking_checked_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Partial order state recorded in audit snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

impl OrderSnapshot {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

impl Order {
    pub fn new(
        campus_id: CampusId,
        buyer_id: UserId,
        seller_id: UserId,
        goods_id: GoodsId,
        amount: i64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            campus_id,
            buyer_id,
            seller_id,
            goods_id,
            amount,
            status: OrderStatus::PendingPayment,
            tracking_no: None,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            completed_at: None,
            abnormal: false,
            abnormal_reason: None,
            tracking_checked_at: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// When the order entered its current status, if that status is timed.
    pub fn status_since(&self) -> Option<DateTime<Utc>> {
        match self.status {
            OrderStatus::Paid => self.paid_at,
            OrderStatus::Shipped => self.shipped_at,
            OrderStatus::Delivered => self.delivered_at,
            OrderStatus::Completed => self.completed_at,
            _ => None,
        }
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.status = OrderStatus::Paid;
        self.paid_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark_shipped(&mut self, tracking_no: impl Into<String>, at: DateTime<Utc>) {
        self.status = OrderStatus::Shipped;
        self.tracking_no = Some(tracking_no.into());
        self.shipped_at = Some(at);
        self.updated_at = at;
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OrderStatus::Shipped {
            return Err(DomainError::invariant(format!(
                "order in {:?} cannot be delivered",
                self.status
            )));
        }
        self.status = OrderStatus::Delivered;
        self.delivered_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Receipt confirmation (by the buyer or by the auto-confirm job).
    pub fn confirm_receipt(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OrderStatus::Delivered {
            return Err(DomainError::invariant(format!(
                "order in {:?} cannot be confirmed",
                self.status
            )));
        }
        self.status = OrderStatus::Completed;
        self.completed_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    pub fn flag_abnormal(&mut self, reason: impl Into<String>, at: DateTime<Utc>) {
        self.abnormal = true;
        self.abnormal_reason = Some(reason.into());
        self.updated_at = at;
    }

    /// Note a carrier query that did not end in delivery, so the next sync
    /// starts with orders not checked for longer.
    pub fn record_tracking_check(&mut self, at: DateTime<Utc>) {
        self.tracking_checked_at = Some(at);
    }

    pub fn restore(&mut self, snapshot: &OrderSnapshot, at: DateTime<Utc>) {
        if let Some(status) = snapshot.status {
            self.status = status;
        }
        self.updated_at = at;
    }
}

impl Versioned for Order {
    fn version(&self) -> u64 {
        self.version
    }
}

pub fn cache_key(id: OrderId) -> String {
    format!("order:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::new(CampusId::new(), UserId::new(), UserId::new(), GoodsId::new(), 500)
    }

    #[test]
    fn status_since_follows_current_status() {
        let mut o = order();
        assert_eq!(o.status_since(), None);

        let paid = Utc::now();
        o.mark_paid(paid);
        assert_eq!(o.status_since(), Some(paid));

        let shipped = paid + chrono::Duration::hours(1);
        o.mark_shipped("SF123", shipped);
        assert_eq!(o.status_since(), Some(shipped));
    }

    #[test]
    fn only_delivered_orders_can_be_confirmed() {
        let mut o = order();
        assert!(o.confirm_receipt(Utc::now()).is_err());

        o.mark_shipped("SF123", Utc::now());
        o.mark_delivered(Utc::now()).unwrap();
        o.confirm_receipt(Utc::now()).unwrap();
        assert_eq!(o.status, OrderStatus::Completed);
        assert!(o.completed_at.is_some());
    }
}
