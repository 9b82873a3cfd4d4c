//! Redis lease locks (optional).
//!
//! Acquire is `SET key token NX PX lease`, polled every 50 ms until the wait
//! elapses. Release deletes the key only if it still holds our token.

use std::thread;
use std::time::{Duration, Instant};

use redis::Commands;

use super::{LockBackend, LockError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisLockBackend {
    client: redis::Client,
    prefix: String,
}

impl RedisLockBackend {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client,
            prefix: "bazaar:lock:".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn connection(&self) -> Result<redis::Connection, LockError> {
        self.client.get_connection().map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> LockError {
    LockError::Backend(e.to_string())
}

impl LockBackend for RedisLockBackend {
    fn acquire(&self, name: &str, token: &str, wait: Duration, lease: Duration) -> Result<bool, LockError> {
        let key = self.key(name);
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let deadline = Instant::now().checked_add(wait);
        let mut conn = self.connection()?;

        loop {
            let set: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query(&mut conn)
                .map_err(backend)?;
            if set.is_some() {
                return Ok(true);
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
    }

    fn release(&self, name: &str, token: &str) -> Result<(), LockError> {
        let mut conn = self.connection()?;
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.key(name))
            .arg(token)
            .invoke(&mut conn)
            .map_err(backend)?;
        Ok(())
    }

    fn is_held(&self, name: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.connection()?;
        let owner: Option<String> = conn.get(self.key(name)).map_err(backend)?;
        Ok(owner.as_deref() == Some(token))
    }
}
