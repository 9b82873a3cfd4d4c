use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use bazaar_core::ExpectedVersion;
use bazaar_market::{user, CacheInvalidator, UserRepository};

use super::{saved, JobError, JobReport, ScheduledJob, DEFAULT_BATCH_SIZE};
use crate::config::PrivacyPurgeSettings;

/// Scrubs personal data of accounts deactivated past the retention period.
pub struct PrivacyPurgeJob {
    users: Arc<dyn UserRepository>,
    cache: Arc<dyn CacheInvalidator>,
    settings: PrivacyPurgeSettings,
    batch_size: usize,
}

impl PrivacyPurgeJob {
    pub fn new(
        users: Arc<dyn UserRepository>,
        cache: Arc<dyn CacheInvalidator>,
        settings: PrivacyPurgeSettings,
    ) -> Self {
        Self {
            users,
            cache,
            settings,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl ScheduledJob for PrivacyPurgeJob {
    fn name(&self) -> &'static str {
        "privacy-purge"
    }

    fn run(&self, now: DateTime<Utc>) -> Result<JobReport, JobError> {
        let cutoff = now - Duration::days(self.settings.privacy_retention_days);
        let expired = self.users.find_deactivated_before(cutoff, self.batch_size)?;

        let mut report = JobReport {
            scanned: expired.len(),
            affected: 0,
        };

        for account in expired {
            let mut scrubbed = account.clone();
            scrubbed.anonymize(now);

            let result = self.users.save(&scrubbed, ExpectedVersion::Exact(account.version));
            if saved(self.name(), account.id, result)?.is_none() {
                continue;
            }
            report.affected += 1;

            if let Err(e) = self.cache.delete(&user::cache_key(account.id)) {
                warn!(job = self.name(), user_id = %account.id, error = %e, "cache invalidation failed");
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaar_core::CampusId;
    use bazaar_market::{InMemoryUserRepository, RecordingCache, User};

    fn deactivated(repo: &InMemoryUserRepository, at: DateTime<Utc>) -> User {
        let mut u = User::new(CampusId::new(), "mei");
        u.phone = Some("13800000000".to_string());
        u.email = Some("mei@example.edu".to_string());
        u.deactivate(at);
        repo.insert(u)
    }

    #[test]
    fn purges_only_after_retention() {
        let now = Utc::now();
        let users = InMemoryUserRepository::arc();
        let cache = RecordingCache::arc();
        let old = deactivated(&users, now - Duration::days(181));
        let recent = deactivated(&users, now - Duration::days(179));

        let job = PrivacyPurgeJob::new(users.clone(), cache.clone(), PrivacyPurgeSettings::default());
        assert_eq!(job.run(now).unwrap(), JobReport { scanned: 1, affected: 1 });

        let purged = users.find(old.id).unwrap().unwrap();
        assert!(purged.anonymized);
        assert_eq!((purged.phone, purged.email), (None, None));
        assert!(purged.nickname.starts_with("deleted-user-"));
        assert!(!users.find(recent.id).unwrap().unwrap().anonymized);
        assert_eq!(cache.deleted(), vec![user::cache_key(old.id)]);

        // Anonymised accounts are not selected again.
        assert_eq!(job.run(now).unwrap(), JobReport::default());
    }
}
