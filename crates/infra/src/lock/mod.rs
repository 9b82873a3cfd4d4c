//! Named mutual exclusion across engine instances.
//!
//! With Redis configured the coordinator takes a leased key per lock name;
//! otherwise (or when Redis errors) it falls back to an in-process registry.
//! Contention is not an error: `try_lock` returns a handle with
//! `acquired == false`.

mod local;
#[cfg(feature = "redis")]
mod redis_lease;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

pub use local::LocalLockRegistry;
#[cfg(feature = "redis")]
pub use redis_lease::RedisLockBackend;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
    #[error("lock registry poisoned")]
    Poisoned,
}

/// Storage of lock ownership. `token` identifies the holder.
pub trait LockBackend: Send + Sync {
    /// Try to take `name` for `token`, waiting up to `wait`. `Ok(false)` on
    /// contention.
    fn acquire(&self, name: &str, token: &str, wait: Duration, lease: Duration) -> Result<bool, LockError>;

    /// Release `name` if `token` still holds it.
    fn release(&self, name: &str, token: &str) -> Result<(), LockError>;

    fn is_held(&self, name: &str, token: &str) -> Result<bool, LockError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Distributed,
    Local,
}

/// How long to wait for a lock and how long a distributed hold lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTiming {
    pub wait: Duration,
    pub lease: Duration,
}

impl Default for LockTiming {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(500),
            lease: Duration::from_secs(600),
        }
    }
}

/// Hands out [`LockHandle`]s.
pub struct LockCoordinator {
    distributed: Option<Arc<dyn LockBackend>>,
    local: Arc<LocalLockRegistry>,
}

impl LockCoordinator {
    /// In-process locks only.
    pub fn local() -> Self {
        Self {
            distributed: None,
            local: Arc::new(LocalLockRegistry::new()),
        }
    }

    /// Distributed locks through `backend`, local locks when it fails.
    pub fn with_distributed(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            distributed: Some(backend),
            local: Arc::new(LocalLockRegistry::new()),
        }
    }

    /// Build from an optional Redis URL. An unusable URL, or a build without
    /// the `redis` feature, yields a local coordinator.
    pub fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            return Self::local();
        };

        #[cfg(feature = "redis")]
        {
            match RedisLockBackend::new(url) {
                Ok(backend) => Self::with_distributed(Arc::new(backend)),
                Err(e) => {
                    warn!(error = %e, "redis lock backend unavailable; using local locks");
                    Self::local()
                }
            }
        }

        #[cfg(not(feature = "redis"))]
        {
            warn!(redis_url = url, "built without the redis feature; using local locks");
            Self::local()
        }
    }

    pub fn mode(&self) -> LockMode {
        if self.distributed.is_some() {
            LockMode::Distributed
        } else {
            LockMode::Local
        }
    }

    /// Try to take `name`, waiting up to `wait`.
    pub fn try_lock(&self, name: &str, wait: Duration, lease: Duration) -> LockHandle {
        let token = Uuid::now_v7().to_string();

        if let Some(backend) = &self.distributed {
            match backend.acquire(name, &token, wait, lease) {
                Ok(acquired) => return LockHandle::new(name, token, acquired, backend.clone()),
                Err(e) => {
                    warn!(lock = name, error = %e, "distributed lock failed; falling back to local lock");
                }
            }
        }

        let local: Arc<dyn LockBackend> = self.local.clone();
        match local.acquire(name, &token, wait, lease) {
            Ok(acquired) => LockHandle::new(name, token, acquired, local),
            Err(e) => {
                warn!(lock = name, error = %e, "local lock failed");
                LockHandle::new(name, token, false, local)
            }
        }
    }

    pub fn try_lock_with(&self, name: &str, timing: LockTiming) -> LockHandle {
        self.try_lock(name, timing.wait, timing.lease)
    }
}

/// Result of [`LockCoordinator::try_lock`]. Releases on drop.
pub struct LockHandle {
    pub name: String,
    pub acquired: bool,
    token: String,
    backend: Option<Arc<dyn LockBackend>>,
}

impl LockHandle {
    fn new(name: &str, token: String, acquired: bool, backend: Arc<dyn LockBackend>) -> Self {
        debug!(lock = name, acquired, "lock attempt");
        Self {
            name: name.to_string(),
            acquired,
            token,
            // Nothing to release for a failed attempt.
            backend: acquired.then_some(backend),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether this handle still owns the lock. For distributed locks this
    /// also detects an expired lease.
    pub fn is_held(&self) -> bool {
        match &self.backend {
            Some(backend) => backend.is_held(&self.name, &self.token).unwrap_or_else(|e| {
                warn!(lock = %self.name, error = %e, "lock ownership check failed");
                false
            }),
            None => false,
        }
    }

    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(backend) = self.backend.take() {
            if let Err(e) = backend.release(&self.name, &self.token) {
                warn!(lock = %self.name, error = %e, "lock release failed");
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.name)
            .field("acquired", &self.acquired)
            .field("released", &self.backend.is_none())
            .finish()
    }
}
