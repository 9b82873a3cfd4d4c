use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{CampusId, DomainError, DomainResult, UserId, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Banned,
    Deactivated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub campus_id: CampusId,
    pub nickname: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: AccountStatus,
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Personal data scrubbed by the privacy purge.
    pub anonymized: bool,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,
}

impl UserSnapshot {
    pub fn status(status: AccountStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

impl User {
    pub fn new(campus_id: CampusId, nickname: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            campus_id,
            nickname: nickname.into(),
            phone: None,
            email: None,
            status: AccountStatus::Active,
            deactivated_at: None,
            anonymized: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn ban(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == AccountStatus::Banned {
            return Err(DomainError::invariant("user already banned"));
        }
        self.status = AccountStatus::Banned;
        self.updated_at = at;
        Ok(())
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.status = AccountStatus::Deactivated;
        self.deactivated_at = Some(at);
        self.updated_at = at;
    }

    /// Scrub personally identifying fields. Idempotent.
    pub fn anonymize(&mut self, at: DateTime<Utc>) {
        let suffix: String = self.id.to_string().chars().take(8).collect();
        self.nickname = format!("deleted-user-{suffix}");
        self.phone = None;
        self.email = None;
        self.anonymized = true;
        self.updated_at = at;
    }

    pub fn restore(&mut self, snapshot: &UserSnapshot, at: DateTime<Utc>) {
        if let Some(status) = snapshot.status {
            self.status = status;
        }
        self.updated_at = at;
    }
}

impl Versioned for User {
    fn version(&self) -> u64 {
        self.version
    }
}

pub fn cache_key(id: UserId) -> String {
    format!("user:{id}")
}
