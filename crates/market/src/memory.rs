//! In-memory collaborators for tests/dev.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use bazaar_core::{ExpectedVersion, UserId};

use crate::dispute::{Dispute, DisputeId, DisputeStatus};
use crate::goods::{Goods, GoodsId};
use crate::order::{Order, OrderId, OrderStatus};
use crate::ports::{
    CacheInvalidator, DisputeRepository, GoodsRepository, LogisticsTracker, Notification,
    NotificationSender, OrderRepository, PortError, RepositoryError, TrackingStatus,
    UserRepository,
};
use crate::user::{AccountStatus, User};

trait Row: Clone + std::fmt::Debug {
    type Key: Copy + Eq + Hash + std::fmt::Debug;
    const NAME: &'static str;

    fn key(&self) -> Self::Key;
    fn row_version(&self) -> u64;
    fn set_row_version(&mut self, version: u64);
}

macro_rules! impl_row {
    ($t:ty, $k:ty, $name:literal) => {
        impl Row for $t {
            type Key = $k;
            const NAME: &'static str = $name;

            fn key(&self) -> Self::Key {
                self.id
            }

            fn row_version(&self) -> u64 {
                self.version
            }

            fn set_row_version(&mut self, version: u64) {
                self.version = version;
            }
        }
    };
}

impl_row!(Goods, GoodsId, "goods");
impl_row!(Order, OrderId, "order");
impl_row!(Dispute, DisputeId, "dispute");
impl_row!(User, UserId, "user");

/// Versioned rows keyed by id. A missing row counts as version 0.
#[derive(Debug)]
struct VersionedTable<R: Row> {
    rows: RwLock<HashMap<R::Key, R>>,
    calls: AtomicUsize,
}

impl<R: Row> VersionedTable<R> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self, key: R::Key) -> Result<Option<R>, RepositoryError> {
        self.touch();
        let rows = self
            .rows
            .read()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(rows.get(&key).cloned())
    }

    fn save(&self, row: &R, expected: ExpectedVersion) -> Result<R, RepositoryError> {
        self.touch();
        let mut rows = self
            .rows
            .write()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let current = rows.get(&row.key()).map(|r| r.row_version()).unwrap_or(0);
        expected
            .check(current)
            .map_err(|e| RepositoryError::Conflict(format!("{} {}", R::NAME, e)))?;

        let mut stored = row.clone();
        stored.set_row_version(current + 1);
        rows.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    fn scan<F>(&self, filter: F) -> Result<Vec<R>, RepositoryError>
    where
        F: Fn(&R) -> bool,
    {
        self.touch();
        let rows = self
            .rows
            .read()
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(rows.values().filter(|r| filter(r)).cloned().collect())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

macro_rules! in_memory_repository {
    ($(#[$meta:meta])* $name:ident, $row:ty) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            table: VersionedTable<$row>,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    table: VersionedTable::new(),
                }
            }

            pub fn arc() -> Arc<Self> {
                Arc::new(Self::new())
            }

            /// Insert or overwrite a fixture row, ignoring versions.
            pub fn insert(&self, row: $row) -> $row {
                match self.table.save(&row, ExpectedVersion::Any) {
                    Ok(stored) => stored,
                    Err(_) => row,
                }
            }

            /// Number of repository calls served so far.
            pub fn calls(&self) -> usize {
                self.table.calls()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

in_memory_repository!(InMemoryGoodsRepository, Goods);
in_memory_repository!(InMemoryOrderRepository, Order);
in_memory_repository!(InMemoryDisputeRepository, Dispute);
in_memory_repository!(InMemoryUserRepository, User);

impl GoodsRepository for InMemoryGoodsRepository {
    fn find(&self, id: GoodsId) -> Result<Option<Goods>, RepositoryError> {
        self.table.get(id)
    }

    fn save(&self, goods: &Goods, expected: ExpectedVersion) -> Result<Goods, RepositoryError> {
        self.table.save(goods, expected)
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn find(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.table.get(id)
    }

    fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<Order, RepositoryError> {
        self.table.save(order, expected)
    }

    fn find_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders = self.table.scan(|o| {
            o.status == status && o.status_since().is_some_and(|since| since < before)
        })?;
        orders.sort_by_key(|o| o.status_since());
        orders.truncate(limit);
        Ok(orders)
    }

    fn find_unflagged_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders = self.table.scan(|o| {
            o.status == status && !o.abnormal && o.status_since().is_some_and(|since| since < before)
        })?;
        orders.sort_by_key(|o| o.status_since());
        orders.truncate(limit);
        Ok(orders)
    }

    fn find_awaiting_tracking(&self, limit: usize) -> Result<Vec<Order>, RepositoryError> {
        let mut orders = self
            .table
            .scan(|o| o.status == OrderStatus::Shipped && o.tracking_no.is_some())?;
        // Never-checked orders sort first.
        orders.sort_by_key(|o| (o.tracking_checked_at, o.shipped_at));
        orders.truncate(limit);
        Ok(orders)
    }
}

impl DisputeRepository for InMemoryDisputeRepository {
    fn find(&self, id: DisputeId) -> Result<Option<Dispute>, RepositoryError> {
        self.table.get(id)
    }

    fn save(&self, dispute: &Dispute, expected: ExpectedVersion) -> Result<Dispute, RepositoryError> {
        self.table.save(dispute, expected)
    }

    fn find_by_status_before(
        &self,
        status: DisputeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Dispute>, RepositoryError> {
        let mut disputes = self
            .table
            .scan(|d| d.status == status && d.status_changed_at < before)?;
        disputes.sort_by_key(|d| d.status_changed_at);
        disputes.truncate(limit);
        Ok(disputes)
    }
}

impl UserRepository for InMemoryUserRepository {
    fn find(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        self.table.get(id)
    }

    fn save(&self, user: &User, expected: ExpectedVersion) -> Result<User, RepositoryError> {
        self.table.save(user, expected)
    }

    fn find_deactivated_before(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<User>, RepositoryError> {
        let mut users = self.table.scan(|u| {
            u.status == AccountStatus::Deactivated
                && !u.anonymized
                && u.deactivated_at.is_some_and(|at| at < before)
        })?;
        users.sort_by_key(|u| u.deactivated_at);
        users.truncate(limit);
        Ok(users)
    }
}

/// Cache that records deleted keys.
#[derive(Debug, Default)]
pub struct RecordingCache {
    deleted: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Make every subsequent `delete` fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl CacheInvalidator for RecordingCache {
    fn delete(&self, key: &str) -> Result<(), PortError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::new("cache", "connection refused"));
        }
        self.deleted
            .lock()
            .map_err(|e| PortError::new("cache", e.to_string()))?
            .push(key.to_string());
        Ok(())
    }
}

/// Notifier that records every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }
}

impl NotificationSender for RecordingNotifier {
    fn send_notification(&self, notification: Notification) -> Result<(), PortError> {
        self.sent
            .lock()
            .map_err(|e| PortError::new("notification", e.to_string()))?
            .push(notification);
        Ok(())
    }
}

/// Tracker answering from a fixed table. Unknown numbers are `Unknown`.
#[derive(Debug, Default)]
pub struct StaticLogisticsTracker {
    statuses: RwLock<HashMap<String, TrackingStatus>>,
    unreachable: AtomicBool,
}

impl StaticLogisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set(&self, tracking_no: impl Into<String>, status: TrackingStatus) {
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.insert(tracking_no.into(), status);
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

impl LogisticsTracker for StaticLogisticsTracker {
    fn query(&self, tracking_no: &str) -> Result<TrackingStatus, PortError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PortError::new("logistics", "carrier api timed out"));
        }
        let statuses = self
            .statuses
            .read()
            .map_err(|e| PortError::new("logistics", e.to_string()))?;
        Ok(statuses
            .get(tracking_no)
            .cloned()
            .unwrap_or(TrackingStatus::Unknown))
    }
}
