use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use bazaar_core::ExpectedVersion;
use bazaar_market::{Notification, NotificationKind, NotificationSender, Order, OrderRepository, OrderStatus};

use super::{notify, saved, JobError, JobReport, ScheduledJob, DEFAULT_BATCH_SIZE};
use crate::config::AbnormalOrderSettings;

/// Flags orders stuck in PAID or SHIPPED for too long.
pub struct AbnormalOrderDetectionJob {
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn NotificationSender>,
    settings: AbnormalOrderSettings,
    batch_size: usize,
}

impl AbnormalOrderDetectionJob {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        notifier: Arc<dyn NotificationSender>,
        settings: AbnormalOrderSettings,
    ) -> Self {
        Self {
            orders,
            notifier,
            settings,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn flag(&self, order: Order, reason: String, now: DateTime<Utc>) -> Result<bool, JobError> {
        let mut flagged = order.clone();
        flagged.flag_abnormal(reason.clone(), now);

        let result = self.orders.save(&flagged, ExpectedVersion::Exact(order.version));
        let Some(saved) = saved(self.name(), order.id, result)? else {
            return Ok(false);
        };

        notify(
            self.name(),
            self.notifier.as_ref(),
            Notification::new(saved.seller_id, NotificationKind::Order, "Order needs attention", reason)
                .related(saved.id.entity_id(), "order"),
        );
        Ok(true)
    }
}

impl ScheduledJob for AbnormalOrderDetectionJob {
    fn name(&self) -> &'static str {
        "abnormal-order-detection"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let paid_hours = self.settings.paid_timeout_hours;
        let shipped_days = self.settings.shipped_timeout_days;

        let unshipped = self.orders.find_unflagged_by_status_before(
            OrderStatus::Paid,
            now - Duration::hours(paid_hours),
            self.batch_size,
        )?;
        let undelivered = self.orders.find_unflagged_by_status_before(
            OrderStatus::Shipped,
            now - Duration::days(shipped_days),
            self.batch_size,
        )?;

        let mut report = JobReport {
            scanned: unshipped.len() + undelivered.len(),
            affected: 0,
        };

        for order in unshipped {
            let reason = format!("paid more than {paid_hours} hours ago and not yet shipped");
            if self.flag(order, reason, now)? {
                report.affected += 1;
            }
        }
        for order in undelivered {
            let reason = format!("shipped more than {shipped_days} days ago and not yet delivered");
            if self.flag(order, reason, now)? {
                report.affected += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{CampusId, UserId};
    use bazaar_market::{GoodsId, InMemoryOrderRepository, RecordingNotifier};

    fn order() -> Order {
        Order::new(CampusId::new(), UserId::new(), UserId::new(), GoodsId::new(), 900)
    }

    #[test]
    fn flags_stale_paid_and_shipped_orders_once() {
        let now = Utc::now();
        let orders = InMemoryOrderRepository::arc();
        let notifier = RecordingNotifier::arc();

        let mut stale_paid = order();
        stale_paid.mark_paid(now - Duration::hours(49));
        let stale_paid = orders.insert(stale_paid);

        let mut fresh_paid = order();
        fresh_paid.mark_paid(now - Duration::hours(47));
        let fresh_paid = orders.insert(fresh_paid);

        let mut stale_shipped = order();
        stale_shipped.mark_shipped("YT9", now - Duration::days(16));
        let stale_shipped = orders.insert(stale_shipped);

        let job = AbnormalOrderDetectionJob::new(orders.clone(), notifier.clone(), AbnormalOrderSettings::default());
        let report = job.run(now).unwrap();
        assert_eq!(report, JobReport { scanned: 2, affected: 2 });

        let flagged = orders.find(stale_paid.id).unwrap().unwrap();
        assert!(flagged.abnormal);
        assert!(flagged.abnormal_reason.unwrap().contains("48 hours"));
        assert!(orders.find(stale_shipped.id).unwrap().unwrap().abnormal);
        assert!(!orders.find(fresh_paid.id).unwrap().unwrap().abnormal);
        assert_eq!(notifier.sent_to(stale_paid.seller_id).len(), 1);

        let again = job.run(now).unwrap();
        assert_eq!(again, JobReport { scanned: 0, affected: 0 });
        assert_eq!(notifier.sent().len(), 2);
    }

    #[test]
    fn flagged_orders_do_not_hide_newer_ones() {
        let now = Utc::now();
        let orders = InMemoryOrderRepository::arc();
        let job = AbnormalOrderDetectionJob::new(orders.clone(), RecordingNotifier::arc(), AbnormalOrderSettings::default())
            .with_batch_size(1);

        let mut oldest = order();
        oldest.mark_paid(now - Duration::hours(100));
        let oldest = orders.insert(oldest);
        assert_eq!(job.run(now).unwrap().affected, 1);
        assert!(orders.find(oldest.id).unwrap().unwrap().abnormal);

        let mut newer = order();
        newer.mark_paid(now - Duration::hours(50));
        let newer = orders.insert(newer);

        assert_eq!(job.run(now).unwrap(), JobReport { scanned: 1, affected: 1 });
        assert!(orders.find(newer.id).unwrap().unwrap().abnormal);
    }
}
