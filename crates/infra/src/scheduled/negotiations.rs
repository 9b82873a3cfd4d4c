use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use bazaar_core::{DomainResult, ExpectedVersion};
use bazaar_market::{
    Dispute, DisputeRepository, DisputeStatus, Notification, NotificationKind, NotificationSender,
};

use super::{notify, saved, JobError, JobReport, ScheduledJob, DEFAULT_BATCH_SIZE};
use crate::config::NegotiationTimeoutSettings;

/// Escalates stalled negotiations to arbitration and times out stalled
/// arbitrations.
pub struct NegotiationTimeoutJob {
    disputes: Arc<dyn DisputeRepository>,
    notifier: Arc<dyn NotificationSender>,
    settings: NegotiationTimeoutSettings,
    batch_size: usize,
}

impl NegotiationTimeoutJob {
    pub fn new(
        disputes: Arc<dyn DisputeRepository>,
        notifier: Arc<dyn NotificationSender>,
        settings: NegotiationTimeoutSettings,
    ) -> Self {
        Self {
            disputes,
            notifier,
            settings,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn advance<F>(&self, dispute: Dispute, now: DateTime<Utc>, step: F, message: &str) -> Result<bool, JobError>
    where
        F: FnOnce(&mut Dispute, DateTime<Utc>) -> DomainResult<()>,
    {
        let mut next = dispute.clone();
        if let Err(e) = step(&mut next, now) {
            debug!(job = self.name(), dispute_id = %dispute.id, reason = %e, "dispute moved on");
            return Ok(false);
        }

        let result = self.disputes.save(&next, ExpectedVersion::Exact(dispute.version));
        let Some(saved) = saved(self.name(), dispute.id, result)? else {
            return Ok(false);
        };

        notify(
            self.name(),
            self.notifier.as_ref(),
            Notification::new(saved.initiator_id, NotificationKind::Dispute, "Dispute update", message)
                .related(saved.id.0, "dispute"),
        );
        Ok(true)
    }
}

impl ScheduledJob for NegotiationTimeoutJob {
    fn name(&self) -> &'static str {
        "check-expired-negotiations"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let negotiating = self.disputes.find_by_status_before(
            DisputeStatus::Negotiating,
            now - Duration::hours(self.settings.negotiation_timeout_hours),
            self.batch_size,
        )?;
        let arbitrating = self.disputes.find_by_status_before(
            DisputeStatus::Arbitrating,
            now - Duration::days(self.settings.arbitration_timeout_days),
            self.batch_size,
        )?;

        let mut report = JobReport {
            scanned: negotiating.len() + arbitrating.len(),
            affected: 0,
        };

        for dispute in negotiating {
            if self.advance(
                dispute,
                now,
                Dispute::escalate_to_arbitration,
                "Negotiation expired without agreement; the platform will arbitrate.",
            )? {
                report.affected += 1;
            }
        }
        for dispute in arbitrating {
            if self.advance(
                dispute,
                now,
                Dispute::time_out,
                "Arbitration expired without a ruling; the dispute has been closed.",
            )? {
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
    use bazaar_market::{InMemoryDisputeRepository, OrderId, RecordingNotifier};

    fn open(repo: &InMemoryDisputeRepository, at: DateTime<Utc>) -> Dispute {
        repo.insert(Dispute::open(CampusId::new(), OrderId::new(), UserId::new(), UserId::new(), at))
    }

    #[test]
    fn escalates_then_times_out() {
        let now = Utc::now();
        let disputes = InMemoryDisputeRepository::arc();
        let notifier = RecordingNotifier::arc();
        let stale = open(&disputes, now - Duration::hours(73));
        let fresh = open(&disputes, now - Duration::hours(71));

        let job = NegotiationTimeoutJob::new(disputes.clone(), notifier.clone(), NegotiationTimeoutSettings::default());
        assert_eq!(job.run(now).unwrap(), JobReport { scanned: 1, affected: 1 });

        let escalated = disputes.find(stale.id).unwrap().unwrap();
        assert_eq!(escalated.status, DisputeStatus::Arbitrating);
        assert_eq!(disputes.find(fresh.id).unwrap().unwrap().status, DisputeStatus::Negotiating);
        assert_eq!(notifier.sent_to(stale.initiator_id).len(), 1);

        // Escalation restarted the clock; a week later it times out.
        let later = now + Duration::days(7) + Duration::seconds(1);
        job.run(later).unwrap();
        assert_eq!(disputes.find(stale.id).unwrap().unwrap().status, DisputeStatus::TimedOut);
        assert_eq!(notifier.sent_to(stale.initiator_id).len(), 2);
    }
}
