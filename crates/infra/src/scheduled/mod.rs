//! Time-triggered coordination jobs.
//!
//! Every instance runs the same schedule; the named lock makes sure only one
//! of them does the work per tick. Job failures are logged and swallowed.

mod abnormal_orders;
mod logistics;
mod negotiations;
mod order_confirm;
mod privacy;
mod scheduler;

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use bazaar_market::{Notification, NotificationSender, PortError, RepositoryError};

use crate::lock::{LockCoordinator, LockTiming};

pub use abnormal_orders::AbnormalOrderDetectionJob;
pub use logistics::LogisticsSyncJob;
pub use negotiations::NegotiationTimeoutJob;
pub use order_confirm::OrderAutoConfirmJob;
pub use privacy::PrivacyPurgeJob;
pub use scheduler::{IntervalScheduler, JobRunnerHandle};

const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Rows looked at and rows changed by one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub scanned: usize,
    pub affected: usize,
}

/// One coordination job.
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lock guarding the job across instances.
    fn lock_name(&self) -> &str {
        self.name()
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another instance holds the lock.
    Skipped,
    Completed(JobReport),
    Failed(String),
}

/// Run `job` under its lock. The lock is released on every path, including
/// a panicking job.
pub fn run_guarded(
    coordinator: &LockCoordinator,
    job: &dyn ScheduledJob,
    timing: LockTiming,
    now: DateTime<Utc>,
) -> TickOutcome {
    let lock = coordinator.try_lock_with(job.lock_name(), timing);
    if !lock.acquired {
        debug!(job = job.name(), lock = job.lock_name(), "lock held elsewhere; skipping tick");
        return TickOutcome::Skipped;
    }

    let result = match panic::catch_unwind(AssertUnwindSafe(|| job.run(now))) {
        Ok(result) => result,
        Err(_) => {
            error!(job = job.name(), "scheduled job panicked");
            return TickOutcome::Failed("job panicked".to_string());
        }
    };

    match result {
        Ok(report) => {
            info!(
                job = job.name(),
                scanned = report.scanned,
                affected = report.affected,
                "scheduled job finished"
            );
            TickOutcome::Completed(report)
        }
        Err(e) => {
            error!(job = job.name(), error = %e, "scheduled job failed");
            TickOutcome::Failed(e.to_string())
        }
    }
}

/// `Ok(None)` when the row changed underneath the job; the next tick sees
/// the new state.
fn saved<T>(job: &str, entity_id: impl Display, result: Result<T, RepositoryError>) -> Result<Option<T>, JobError> {
    match result {
        Ok(row) => Ok(Some(row)),
        Err(RepositoryError::Conflict(msg)) => {
            debug!(job, entity_id = %entity_id, reason = %msg, "row changed concurrently; skipped");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Notification delivery is best effort.
fn notify(job: &str, notifier: &dyn NotificationSender, notification: Notification) {
    let user_id = notification.user_id;
    if let Err(e) = notifier.send_notification(notification) {
        warn!(job, user_id = %user_id, error = %e, "notification failed");
    }
}
