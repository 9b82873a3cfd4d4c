//! Engine configuration.
//!
//! Sources, later overriding earlier:
//! 1. `bazaar.yaml` in the working directory (if present)
//! 2. the file named by `BAZAAR_CONFIG` (if set)
//! 3. `BAZAAR__*` environment variables, `__` separating sections
//!    (e.g. `BAZAAR__DISPATCHER__WORKERS=8`)

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use bazaar_observability::LogFormat;

use crate::lock::LockTiming;

pub const CONFIG_ENV_VAR: &str = "BAZAAR_CONFIG";
pub const CONFIG_ENV_PREFIX: &str = "BAZAAR";
pub const DEFAULT_CONFIG_FILE: &str = "bazaar";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub dispatcher: DispatcherSettings,
    pub locks: LocksConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Unset means in-process locks.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub workers: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    pub wait_ms: u64,
    pub lease_ms: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            wait_ms: 500,
            lease_ms: 600_000,
        }
    }
}

impl LocksConfig {
    pub fn timing(&self) -> LockTiming {
        LockTiming {
            wait: Duration::from_millis(self.wait_ms),
            lease: Duration::from_millis(self.lease_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Upper bound on rows one job run touches.
    pub batch_size: usize,
    pub order_auto_confirm: AutoConfirmSettings,
    pub abnormal_order_detection: AbnormalOrderSettings,
    pub check_expired_negotiations: NegotiationTimeoutSettings,
    pub logistics_sync: LogisticsSyncSettings,
    pub privacy_purge: PrivacyPurgeSettings,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            order_auto_confirm: AutoConfirmSettings::default(),
            abnormal_order_detection: AbnormalOrderSettings::default(),
            check_expired_negotiations: NegotiationTimeoutSettings::default(),
            logistics_sync: LogisticsSyncSettings::default(),
            privacy_purge: PrivacyPurgeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfirmSettings {
    pub interval_secs: u64,
    pub auto_confirm_days: i64,
}

impl Default for AutoConfirmSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            auto_confirm_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbnormalOrderSettings {
    pub interval_secs: u64,
    pub paid_timeout_hours: i64,
    pub shipped_timeout_days: i64,
}

impl Default for AbnormalOrderSettings {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
            paid_timeout_hours: 48,
            shipped_timeout_days: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationTimeoutSettings {
    pub interval_secs: u64,
    pub negotiation_timeout_hours: i64,
    pub arbitration_timeout_days: i64,
}

impl Default for NegotiationTimeoutSettings {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            negotiation_timeout_hours: 72,
            arbitration_timeout_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticsSyncSettings {
    pub interval_secs: u64,
}

impl Default for LogisticsSyncSettings {
    fn default() -> Self {
        Self { interval_secs: 1800 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyPurgeSettings {
    pub interval_secs: u64,
    pub privacy_retention_days: i64,
}

impl Default for PrivacyPurgeSettings {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
            privacy_retention_days: 180,
        }
    }
}

/// Interval from a seconds setting, never below one second.
pub fn interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

impl EngineConfig {
    /// Load from the default file, `BAZAAR_CONFIG` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(std::env::var(CONFIG_ENV_VAR).ok().as_deref())
    }

    /// Like [`load`](Self::load) with an explicit file instead of
    /// `BAZAAR_CONFIG`. A named file must exist.
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        let config: EngineConfig = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::Invalid("dispatcher.workers must be at least 1".to_string()));
        }
        if self.jobs.batch_size == 0 {
            return Err(ConfigError::Invalid("jobs.batch_size must be at least 1".to_string()));
        }
        if self.locks.lease_ms == 0 {
            return Err(ConfigError::Invalid("locks.lease_ms must be positive".to_string()));
        }
        Ok(())
    }
}
