//! Infrastructure layer: lock coordination, scheduled coordination jobs and
//! configuration loading.

pub mod config;
pub mod lock;
pub mod scheduled;

pub use self::config::{ConfigError, EngineConfig, LogFormat};
pub use lock::{LockBackend, LockCoordinator, LockError, LockHandle, LockMode, LockTiming};
pub use scheduled::{
    run_guarded, AbnormalOrderDetectionJob, IntervalScheduler, JobError, JobReport,
    JobRunnerHandle, LogisticsSyncJob, NegotiationTimeoutJob, OrderAutoConfirmJob,
    PrivacyPurgeJob, ScheduledJob, TickOutcome,
};
