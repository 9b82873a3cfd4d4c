use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use bazaar_core::UserId;
use bazaar_market::{Notification, NotificationKind, NotificationSender, UserRepository};

use crate::processor::{BatchProcessor, ItemContext, ItemOutcome, ProcessorError};
use crate::task::{BatchTaskItem, BatchType};

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    title: String,
    content: String,
    #[serde(default = "default_kind")]
    kind: NotificationKind,
    #[serde(default)]
    link: Option<String>,
}

fn default_kind() -> NotificationKind {
    NotificationKind::System
}

/// Sends one in-app notification per target user.
///
/// Notifications change no entity state, so nothing is audited.
pub struct BulkNotificationProcessor {
    users: Arc<dyn UserRepository>,
    notifier: Arc<dyn NotificationSender>,
}

impl BulkNotificationProcessor {
    pub fn new(users: Arc<dyn UserRepository>, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { users, notifier }
    }
}

impl BatchProcessor for BulkNotificationProcessor {
    fn supported_type(&self) -> BatchType {
        BatchType::BulkNotification
    }

    fn process_item(&self, cx: &ItemContext, item: &BatchTaskItem) -> Result<ItemOutcome, ProcessorError> {
        let payload: NotificationPayload = item.payload()?;
        let user_id = UserId::from(item.target_id);

        let exists = self
            .users
            .find(user_id)?
            .is_some_and(|u| u.campus_id == cx.request.campus_id);
        if !exists {
            return Ok(ItemOutcome::failed("user not found"));
        }

        let mut notification = Notification::new(user_id, payload.kind, payload.title, payload.content);
        if let Some(link) = payload.link {
            notification = notification.with_link(link);
        }
        self.notifier.send_notification(notification)?;

        Ok(ItemOutcome::succeeded(json!({ "user_id": user_id })))
    }
}
