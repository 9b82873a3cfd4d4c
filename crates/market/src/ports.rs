//! Collaborator interfaces consumed by the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{DomainError, EntityId, ExpectedVersion, UserId};

use crate::dispute::{Dispute, DisputeId, DisputeStatus};
use crate::goods::{Goods, GoodsId};
use crate::order::{Order, OrderId, OrderStatus};
use crate::user::User;

/// Repository error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for RepositoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Conflict(msg) => RepositoryError::Conflict(msg),
            DomainError::NotFound(what) => RepositoryError::NotFound(what),
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

/// Failure of a non-repository collaborator (cache, notifier, logistics).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{service} unavailable: {message}")]
pub struct PortError {
    pub service: &'static str,
    pub message: String,
}

impl PortError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

/// Goods persistence. `save` bumps the version and returns the stored row.
pub trait GoodsRepository: Send + Sync {
    fn find(&self, id: GoodsId) -> Result<Option<Goods>, RepositoryError>;
    fn save(&self, goods: &Goods, expected: ExpectedVersion) -> Result<Goods, RepositoryError>;
}

pub trait OrderRepository: Send + Sync {
    fn find(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;
    fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<Order, RepositoryError>;

    /// Orders in `status` that entered it strictly before `before`.
    fn find_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// Like [`find_by_status_before`](Self::find_by_status_before), skipping
    /// orders already flagged abnormal.
    fn find_unflagged_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// Shipped orders with a tracking number, least recently checked first.
    fn find_awaiting_tracking(&self, limit: usize) -> Result<Vec<Order>, RepositoryError>;
}

pub trait DisputeRepository: Send + Sync {
    fn find(&self, id: DisputeId) -> Result<Option<Dispute>, RepositoryError>;
    fn save(&self, dispute: &Dispute, expected: ExpectedVersion) -> Result<Dispute, RepositoryError>;

    fn find_by_status_before(
        &self,
        status: DisputeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Dispute>, RepositoryError>;
}

pub trait UserRepository: Send + Sync {
    fn find(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    fn save(&self, user: &User, expected: ExpectedVersion) -> Result<User, RepositoryError>;

    /// Deactivated, not yet anonymised users deactivated before `before`.
    fn find_deactivated_before(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<User>, RepositoryError>;
}

/// Cache invalidation.
pub trait CacheInvalidator: Send + Sync {
    fn delete(&self, key: &str) -> Result<(), PortError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    System,
    Order,
    Goods,
    Dispute,
    Account,
}

/// One in-app notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub related_id: Option<EntityId>,
    pub related_type: Option<String>,
    pub link: Option<String>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            related_id: None,
            related_type: None,
            link: None,
        }
    }

    pub fn related(mut self, id: EntityId, related_type: impl Into<String>) -> Self {
        self.related_id = Some(id);
        self.related_type = Some(related_type.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

pub trait NotificationSender: Send + Sync {
    fn send_notification(&self, notification: Notification) -> Result<(), PortError>;
}

/// Carrier-side shipment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingStatus {
    InTransit,
    Delivered { at: DateTime<Utc> },
    Unknown,
}

pub trait LogisticsTracker: Send + Sync {
    fn query(&self, tracking_no: &str) -> Result<TrackingStatus, PortError>;
}

impl<S: GoodsRepository + ?Sized> GoodsRepository for Arc<S> {
    fn find(&self, id: GoodsId) -> Result<Option<Goods>, RepositoryError> {
        (**self).find(id)
    }

    fn save(&self, goods: &Goods, expected: ExpectedVersion) -> Result<Goods, RepositoryError> {
        (**self).save(goods, expected)
    }
}

impl<S: OrderRepository + ?Sized> OrderRepository for Arc<S> {
    fn find(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        (**self).find(id)
    }

    fn save(&self, order: &Order, expected: ExpectedVersion) -> Result<Order, RepositoryError> {
        (**self).save(order, expected)
    }

    fn find_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        (**self).find_by_status_before(status, before, limit)
    }

    fn find_unflagged_by_status_before(
        &self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, RepositoryError> {
        (**self).find_unflagged_by_status_before(status, before, limit)
    }

    fn find_awaiting_tracking(&self, limit: usize) -> Result<Vec<Order>, RepositoryError> {
        (**self).find_awaiting_tracking(limit)
    }
}

impl<S: DisputeRepository + ?Sized> DisputeRepository for Arc<S> {
    fn find(&self, id: DisputeId) -> Result<Option<Dispute>, RepositoryError> {
        (**self).find(id)
    }

    fn save(&self, dispute: &Dispute, expected: ExpectedVersion) -> Result<Dispute, RepositoryError> {
        (**self).save(dispute, expected)
    }

    fn find_by_status_before(
        &self,
        status: DisputeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Dispute>, RepositoryError> {
        (**self).find_by_status_before(status, before, limit)
    }
}

impl<S: UserRepository + ?Sized> UserRepository for Arc<S> {
    fn find(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        (**self).find(id)
    }

    fn save(&self, user: &User, expected: ExpectedVersion) -> Result<User, RepositoryError> {
        (**self).save(user, expected)
    }

    fn find_deactivated_before(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<User>, RepositoryError> {
        (**self).find_deactivated_before(before, limit)
    }
}

impl<S: CacheInvalidator + ?Sized> CacheInvalidator for Arc<S> {
    fn delete(&self, key: &str) -> Result<(), PortError> {
        (**self).delete(key)
    }
}

impl<S: NotificationSender + ?Sized> NotificationSender for Arc<S> {
    fn send_notification(&self, notification: Notification) -> Result<(), PortError> {
        (**self).send_notification(notification)
    }
}

impl<S: LogisticsTracker + ?Sized> LogisticsTracker for Arc<S> {
    fn query(&self, tracking_no: &str) -> Result<TrackingStatus, PortError> {
        (**self).query(tracking_no)
    }
}
