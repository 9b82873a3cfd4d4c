use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{LockBackend, LockError};

/// In-process lock table keyed by name. Holds do not expire.
#[derive(Debug, Default)]
pub struct LocalLockRegistry {
    held: Mutex<HashMap<String, String>>,
    released: Condvar,
}

impl LocalLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl LockBackend for LocalLockRegistry {
    fn acquire(&self, name: &str, token: &str, wait: Duration, _lease: Duration) -> Result<bool, LockError> {
        // `None` means wait until released.
        let deadline = Instant::now().checked_add(wait);
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;

        loop {
            if !held.contains_key(name) {
                held.insert(name.to_string(), token.to_string());
                return Ok(true);
            }

            held = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| LockError::Poisoned)?
                        .0
                }
                None => self.released.wait(held).map_err(|_| LockError::Poisoned)?,
            };
        }
    }

    fn release(&self, name: &str, token: &str) -> Result<(), LockError> {
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        if held.get(name).is_some_and(|owner| owner == token) {
            held.remove(name);
            self.released.notify_all();
        }
        Ok(())
    }

    fn is_held(&self, name: &str, token: &str) -> Result<bool, LockError> {
        let held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        Ok(held.get(name).is_some_and(|owner| owner == token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(1);

    #[test]
    fn foreign_token_cannot_release() {
        let registry = LocalLockRegistry::new();
        assert!(registry.acquire("job", "a", Duration::ZERO, LEASE).unwrap());

        registry.release("job", "b").unwrap();
        assert!(registry.is_held("job", "a").unwrap());
        assert_eq!(registry.held_count(), 1);
    }

    #[test]
    fn unbounded_wait_blocks_until_release() {
        let registry = Arc::new(LocalLockRegistry::new());
        assert!(registry.acquire("job", "a", Duration::ZERO, LEASE).unwrap());

        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || registry.acquire("job", "b", Duration::MAX, LEASE).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        registry.release("job", "a").unwrap();

        assert!(waiter.join().unwrap());
        assert!(registry.is_held("job", "b").unwrap());
    }

    #[test]
    fn waiter_wakes_on_release() {
        let registry = Arc::new(LocalLockRegistry::new());
        assert!(registry.acquire("job", "a", Duration::ZERO, LEASE).unwrap());

        let waiter = {
            let registry = registry.clone();
            thread::spawn(move || registry.acquire("job", "b", Duration::from_secs(5), LEASE).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        registry.release("job", "a").unwrap();

        assert!(waiter.join().unwrap());
        assert!(registry.is_held("job", "b").unwrap());
    }

    #[test]
    fn wait_times_out() {
        let registry = LocalLockRegistry::new();
        assert!(registry.acquire("job", "a", Duration::ZERO, LEASE).unwrap());

        let started = Instant::now();
        assert!(!registry.acquire("job", "b", Duration::from_millis(30), LEASE).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
