use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use bazaar_core::ExpectedVersion;
use bazaar_market::{LogisticsTracker, OrderRepository, OrderStatus, TrackingStatus};

use super::{saved, JobError, JobReport, ScheduledJob, DEFAULT_BATCH_SIZE};

/// Moves shipped orders to DELIVERED once the carrier reports delivery.
pub struct LogisticsSyncJob {
    orders: Arc<dyn OrderRepository>,
    tracker: Arc<dyn LogisticsTracker>,
    batch_size: usize,
}

impl LogisticsSyncJob {
    pub fn new(orders: Arc<dyn OrderRepository>, tracker: Arc<dyn LogisticsTracker>) -> Self {
        Self {
            orders,
            tracker,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl ScheduledJob for LogisticsSyncJob {
    fn name(&self) -> &'static str {
        "logistics-sync"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let shipped = self.orders.find_awaiting_tracking(self.batch_size)?;
        let mut report = JobReport {
            scanned: shipped.len(),
            affected: 0,
        };

        for order in shipped {
            let Some(tracking_no) = order.tracking_no.as_deref() else {
                continue;
            };

            // One carrier failure must not hold up the other orders.
            let delivered_at = match self.tracker.query(tracking_no) {
                Ok(TrackingStatus::Delivered { at }) => Some(at),
                Ok(_) => None,
                Err(e) => {
                    warn!(job = self.name(), order_id = %order.id, tracking_no, error = %e, "tracking query failed");
                    None
                }
            };

            let mut updated = order.clone();
            let delivered = match delivered_at {
                Some(at) => match updated.mark_delivered(at) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(job = self.name(), order_id = %order.id, reason = %e, "order no longer shipped");
                        continue;
                    }
                },
                None => {
                    updated.record_tracking_check(now);
                    false
                }
            };

            let result = self.orders.save(&updated, ExpectedVersion::Exact(order.version));
            if saved(self.name(), order.id, result)?.is_some() && delivered {
                report.affected += 1;
            }
        }

        Ok(report)
    }
}
