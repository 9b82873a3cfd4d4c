use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use bazaar_core::ExpectedVersion;
use bazaar_market::{Notification, NotificationKind, NotificationSender, OrderRepository, OrderStatus};

use super::{notify, saved, JobError, JobReport, ScheduledJob, DEFAULT_BATCH_SIZE};
use crate::config::AutoConfirmSettings;

/// Completes delivered orders the buyer never confirmed.
pub struct OrderAutoConfirmJob {
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn NotificationSender>,
    settings: AutoConfirmSettings,
    batch_size: usize,
}

impl OrderAutoConfirmJob {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        notifier: Arc<dyn NotificationSender>,
        settings: AutoConfirmSettings,
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
}

impl ScheduledJob for OrderAutoConfirmJob {
    fn name(&self) -> &'static str {
        "order-auto-confirm"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let cutoff = now - Duration::days(self.settings.auto_confirm_days);
        let due = self
            .orders
            .find_by_status_before(OrderStatus::Delivered, cutoff, self.batch_size)?;

        let mut report = JobReport {
            scanned: due.len(),
            affected: 0,
        };

        for order in due {
            let mut confirmed = order.clone();
            if let Err(e) = confirmed.confirm_receipt(now) {
                debug!(job = self.name(), order_id = %order.id, reason = %e, "order no longer confirmable");
                continue;
            }

            let result = self.orders.save(&confirmed, ExpectedVersion::Exact(order.version));
            let Some(saved) = saved(self.name(), order.id, result)? else {
                continue;
            };
            report.affected += 1;

            let related = saved.id.entity_id();
            notify(
                self.name(),
                self.notifier.as_ref(),
                Notification::new(
                    saved.buyer_id,
                    NotificationKind::Order,
                    "Order completed",
                    format!(
                        "Receipt was confirmed automatically {} days after delivery.",
                        self.settings.auto_confirm_days
                    ),
                )
                .related(related, "order"),
            );
            notify(
                self.name(),
                self.notifier.as_ref(),
                Notification::new(
                    saved.seller_id,
                    NotificationKind::Order,
                    "Order completed",
                    "The buyer's receipt was confirmed automatically.",
                )
                .related(related, "order"),
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::{CampusId, UserId};
    use bazaar_market::{GoodsId, InMemoryOrderRepository, Order, RecordingNotifier};
    use proptest::prelude::*;

    fn delivered(repo: &InMemoryOrderRepository, at: DateTime<Utc>) -> Order {
        let mut order = Order::new(CampusId::new(), UserId::new(), UserId::new(), GoodsId::new(), 900);
        order.mark_paid(at - Duration::days(3));
        order.mark_shipped("SF1", at - Duration::days(2));
        order.mark_delivered(at).unwrap();
        repo.insert(order)
    }

    #[test]
    fn confirms_only_orders_past_the_window() {
        let now = Utc::now();
        let orders = InMemoryOrderRepository::arc();
        let notifier = RecordingNotifier::arc();
        let stale = delivered(&orders, now - Duration::days(8));
        let fresh = delivered(&orders, now - Duration::days(6));

        let job = OrderAutoConfirmJob::new(orders.clone(), notifier.clone(), AutoConfirmSettings::default());
        let report = job.run(now).unwrap();

        assert_eq!(report, JobReport { scanned: 1, affected: 1 });
        assert_eq!(orders.find(stale.id).unwrap().unwrap().status, OrderStatus::Completed);
        assert_eq!(orders.find(fresh.id).unwrap().unwrap().status, OrderStatus::Delivered);
        assert_eq!(notifier.sent_to(stale.buyer_id).len(), 1);
        assert_eq!(notifier.sent_to(stale.seller_id).len(), 1);
    }

    #[test]
    fn second_run_finds_nothing() {
        let now = Utc::now();
        let orders = InMemoryOrderRepository::arc();
        delivered(&orders, now - Duration::days(10));
        let job = OrderAutoConfirmJob::new(orders, RecordingNotifier::arc(), AutoConfirmSettings::default());

        job.run(now).unwrap();
        assert_eq!(job.run(now).unwrap(), JobReport::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: an order is confirmed exactly when it was delivered
        /// strictly before the cutoff.
        #[test]
        fn confirms_strictly_before_cutoff(days in 1i64..30, offset_secs in -3_600i64..3_600) {
            let now = Utc::now();
            let orders = InMemoryOrderRepository::arc();
            let settings = AutoConfirmSettings { auto_confirm_days: days, ..AutoConfirmSettings::default() };
            let order = delivered(&orders, now - Duration::days(days) + Duration::seconds(offset_secs));

            let job = OrderAutoConfirmJob::new(orders.clone(), RecordingNotifier::arc(), settings);
            job.run(now).unwrap();

            let completed = orders.find(order.id).unwrap().unwrap().status == OrderStatus::Completed;
            prop_assert_eq!(completed, offset_secs < 0);
        }
    }
}
