use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CampusId, DomainError, DomainResult, EntityId, UserId, Versioned};

/// Maximum price change, as a percentage of the current price, a single
/// adjustment may apply.
pub const MAX_PRICE_CHANGE_PERCENT: i64 = 200;

/// Goods identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoodsId(pub EntityId);

impl GoodsId {
    pub fn new() -> Self {
        Self(EntityId::new())
    }

    pub fn entity_id(&self) -> EntityId {
        self.0
    }
}

impl Default for GoodsId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<EntityId> for GoodsId {
    fn from(value: EntityId) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for GoodsId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Goods listing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsStatus {
    PendingReview,
    OnSale,
    Offline,
    Sold,
    Deleted,
}

/// A marketplace listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goods {
    pub id: GoodsId,
    pub campus_id: CampusId,
    pub seller_id: UserId,
    pub title: String,
    /// Smallest currency unit (cents).
    pub price: i64,
    pub stock: i64,
    pub status: GoodsStatus,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Partial goods state recorded in audit snapshots.
///
/// Only the fields an operation touched are present, so a snapshot can be
/// compared against, and restored onto, the current row field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GoodsStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
}

impl GoodsSnapshot {
    pub fn status(status: GoodsStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn price(price: i64) -> Self {
        Self {
            price: Some(price),
            ..Self::default()
        }
    }

    pub fn stock(stock: i64) -> Self {
        Self {
            stock: Some(stock),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.price.is_none() && self.stock.is_none()
    }
}

impl Goods {
    pub fn new(campus_id: CampusId, seller_id: UserId, title: impl Into<String>, price: i64, stock: i64) -> Self {
        Self {
            id: GoodsId::new(),
            campus_id,
            seller_id,
            title: title.into(),
            price,
            stock,
            status: GoodsStatus::PendingReview,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: GoodsStatus) -> Self {
        self.status = status;
        self
    }

    fn ensure_not_deleted(&self) -> DomainResult<()> {
        if self.status == GoodsStatus::Deleted {
            return Err(DomainError::invariant("goods has been deleted"));
        }
        Ok(())
    }

    /// Approve / re-list the goods.
    pub fn put_online(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_deleted()?;
        match self.status {
            GoodsStatus::OnSale => Err(DomainError::invariant("goods already online")),
            GoodsStatus::Sold => Err(DomainError::invariant("goods already sold")),
            _ => {
                self.status = GoodsStatus::OnSale;
                self.updated_at = now;
                Ok(())
            }
        }
    }

    pub fn take_offline(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_deleted()?;
        match self.status {
            GoodsStatus::Offline => Err(DomainError::invariant("goods already offline")),
            GoodsStatus::OnSale | GoodsStatus::PendingReview => {
                self.status = GoodsStatus::Offline;
                self.updated_at = now;
                Ok(())
            }
            GoodsStatus::Sold => Err(DomainError::invariant("goods already sold")),
            GoodsStatus::Deleted => Err(DomainError::invariant("goods has been deleted")),
        }
    }

    /// Soft delete: the row stays so the change can be reverted.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == GoodsStatus::Deleted {
            return Err(DomainError::invariant("goods already deleted"));
        }
        self.status = GoodsStatus::Deleted;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_stock(&mut self, stock: i64, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_deleted()?;
        if stock < 0 {
            return Err(DomainError::validation("stock must be non-negative"));
        }
        self.stock = stock;
        self.updated_at = now;
        Ok(())
    }

    /// Set a new price, capped at [`MAX_PRICE_CHANGE_PERCENT`] of the current one.
    pub fn adjust_price(&mut self, price: i64, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_not_deleted()?;
        if price <= 0 {
            return Err(DomainError::validation("price must be positive"));
        }
        // Widened so extreme payload prices cannot overflow the cap check.
        let delta = (i128::from(price) - i128::from(self.price)).abs();
        if self.price > 0 && delta * 100 > i128::from(self.price) * i128::from(MAX_PRICE_CHANGE_PERCENT) {
            return Err(DomainError::invariant(format!(
                "price change exceeds {MAX_PRICE_CHANGE_PERCENT}% of original price ({} -> {})",
                self.price, price
            )));
        }
        self.price = price;
        self.updated_at = now;
        Ok(())
    }

    /// Fields of `snapshot` that differ from the current row.
    pub fn diverging_fields(&self, snapshot: &GoodsSnapshot) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if snapshot.status.is_some_and(|s| s != self.status) {
            fields.push("status");
        }
        if snapshot.price.is_some_and(|p| p != self.price) {
            fields.push("price");
        }
        if snapshot.stock.is_some_and(|s| s != self.stock) {
            fields.push("stock");
        }
        fields
    }

    /// Current values of the fields present in `shape`.
    pub fn snapshot_like(&self, shape: &GoodsSnapshot) -> GoodsSnapshot {
        GoodsSnapshot {
            status: shape.status.map(|_| self.status),
            price: shape.price.map(|_| self.price),
            stock: shape.stock.map(|_| self.stock),
        }
    }

    /// Overwrite the fields present in `snapshot`. Business caps do not apply:
    /// this restores a state the entity already had.
    pub fn restore(&mut self, snapshot: &GoodsSnapshot, now: DateTime<Utc>) {
        if let Some(status) = snapshot.status {
            self.status = status;
        }
        if let Some(price) = snapshot.price {
            self.price = price;
        }
        if let Some(stock) = snapshot.stock {
            self.stock = stock;
        }
        self.updated_at = now;
    }

    pub fn cache_key(&self) -> String {
        cache_key(self.id)
    }
}

impl Versioned for Goods {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Cache key of the goods detail entry.
pub fn cache_key(id: GoodsId) -> String {
    format!("goods:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn goods(price: i64) -> Goods {
        Goods::new(CampusId::new(), UserId::new(), "desk lamp", price, 3)
            .with_status(GoodsStatus::OnSale)
    }

    #[test]
    fn offline_twice_is_rejected() {
        let mut g = goods(100);
        g.take_offline(Utc::now()).unwrap();
        let err = g.take_offline(Utc::now()).unwrap_err();
        assert_eq!(err, DomainError::invariant("goods already offline"));
    }

    #[test]
    fn approving_approved_goods_is_rejected() {
        let mut g = goods(100);
        assert!(g.put_online(Utc::now()).is_err());
    }

    #[test]
    fn deleted_goods_cannot_change_stock() {
        let mut g = goods(100);
        g.mark_deleted(Utc::now()).unwrap();
        assert!(g.set_stock(4, Utc::now()).is_err());
        assert!(g.mark_deleted(Utc::now()).is_err());
    }

    #[test]
    fn price_change_of_exactly_200_percent_is_allowed() {
        let mut g = goods(100);
        g.adjust_price(300, Utc::now()).unwrap();
        assert_eq!(g.price, 300);
    }

    #[test]
    fn price_change_of_250_percent_is_rejected() {
        let mut g = goods(100);
        let err = g.adjust_price(350, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("exceeds 200%"));
        assert_eq!(g.price, 100);
    }

    #[test]
    fn extreme_price_is_rejected_without_overflow() {
        let mut g = goods(100);
        let err = g.adjust_price(i64::MAX, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("exceeds 200%"));
        assert_eq!(g.price, 100);

        let mut g = goods(i64::MAX);
        assert!(g.adjust_price(1, Utc::now()).is_ok());
    }

    #[test]
    fn restore_only_touches_present_fields() {
        let mut g = goods(150);
        g.restore(&GoodsSnapshot::price(100), Utc::now());
        assert_eq!(g.price, 100);
        assert_eq!(g.stock, 3);
        assert_eq!(g.status, GoodsStatus::OnSale);
    }

    #[test]
    fn diverging_fields_ignores_absent_fields() {
        let g = goods(150);
        assert!(g.diverging_fields(&GoodsSnapshot::price(150)).is_empty());
        assert_eq!(g.diverging_fields(&GoodsSnapshot::price(120)), vec!["price"]);
    }

    #[test]
    fn snapshot_serialises_only_present_fields() {
        let json = serde_json::to_value(GoodsSnapshot::price(100)).unwrap();
        assert_eq!(json, serde_json::json!({"price": 100}));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: an accepted adjustment never moves the price by more than the cap.
        #[test]
        fn accepted_price_changes_respect_cap(old in 1i64..1_000_000, new in 1i64..4_000_000) {
            let mut g = goods(old);
            if g.adjust_price(new, Utc::now()).is_ok() {
                prop_assert!((new - old).abs() * 100 <= old * MAX_PRICE_CHANGE_PERCENT);
                prop_assert_eq!(g.price, new);
            } else {
                prop_assert_eq!(g.price, old);
            }
        }
    }
}
