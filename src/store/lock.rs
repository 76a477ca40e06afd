//! Named locks that serialize writers per root.

use super::error::LockError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Provider of named, time-bounded locks.
///
/// A lock is held until its guard is dropped or its hold time expires,
/// whichever comes first.
pub trait LockProvider: Send + Sync {
    /// Acquire `key`, waiting at most `wait` for a current holder.
    fn acquire(&self, key: &str, wait: Duration, hold: Duration) -> Result<LockGuard, LockError>;

    /// Whether `key` is currently held by anyone.
    fn is_locked(&self, key: &str) -> bool;
}

/// Releases its lock when dropped.
pub struct LockGuard {
    key: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(key: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key: key.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

#[derive(Debug)]
struct Lease {
    token: Uuid,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Leases {
    held: Mutex<HashMap<String, Lease>>,
    released: Condvar,
}

/// In-process lock provider.
#[derive(Clone, Debug, Default)]
pub struct MemoryLocks {
    leases: Arc<Leases>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockProvider for MemoryLocks {
    fn acquire(&self, key: &str, wait: Duration, hold: Duration) -> Result<LockGuard, LockError> {
        let started = Instant::now();
        let deadline = started + wait;
        let mut held = self.leases.held.lock();

        loop {
            let now = Instant::now();
            let wake_at = match held.get(key) {
                Some(lease) if lease.expires_at > now => lease.expires_at.min(deadline),
                _ => {
                    let token = Uuid::new_v4();
                    held.insert(
                        key.to_string(),
                        Lease {
                            token,
                            expires_at: now + hold,
                        },
                    );
                    tracing::debug!(lock = key, "lock acquired");

                    let leases = Arc::clone(&self.leases);
                    let owned_key = key.to_string();
                    return Ok(LockGuard::new(key, move || {
                        let mut held = leases.held.lock();
                        if held.get(&owned_key).is_some_and(|lease| lease.token == token) {
                            held.remove(&owned_key);
                        }
                        drop(held);
                        leases.released.notify_all();
                    }));
                }
            };

            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            self.leases.released.wait_until(&mut held, wake_at);
        }
    }

    fn is_locked(&self, key: &str) -> bool {
        self.leases
            .held
            .lock()
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const HOLD: Duration = Duration::from_secs(60);

    #[test]
    fn second_acquire_times_out_while_held() {
        let locks = MemoryLocks::new();
        let _guard = locks.acquire("root-1", Duration::ZERO, HOLD).unwrap();

        let err = locks
            .acquire("root-1", Duration::from_millis(20), HOLD)
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "root-1"));
    }

    #[test]
    fn dropping_guard_releases() {
        let locks = MemoryLocks::new();
        let guard = locks.acquire("root-1", Duration::ZERO, HOLD).unwrap();
        assert!(locks.is_locked("root-1"));

        drop(guard);
        assert!(!locks.is_locked("root-1"));
        assert!(locks.acquire("root-1", Duration::ZERO, HOLD).is_ok());
    }

    #[test]
    fn different_keys_do_not_contend() {
        let locks = MemoryLocks::new();
        let _a = locks.acquire("a", Duration::ZERO, HOLD).unwrap();
        assert!(locks.acquire("b", Duration::ZERO, HOLD).is_ok());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let locks = MemoryLocks::new();
        let stale = locks
            .acquire("root-1", Duration::ZERO, Duration::from_millis(10))
            .unwrap();
        thread::sleep(Duration::from_millis(20));

        let fresh = locks.acquire("root-1", Duration::ZERO, HOLD).unwrap();
        // The stale guard must not release the new holder's lease.
        drop(stale);
        assert!(locks.is_locked("root-1"));
        drop(fresh);
    }

    #[test]
    fn waiter_acquires_after_release() {
        let locks = MemoryLocks::new();
        let guard = locks.acquire("root-1", Duration::ZERO, HOLD).unwrap();

        let contender = {
            let locks = locks.clone();
            thread::spawn(move || locks.acquire("root-1", Duration::from_secs(5), HOLD).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert!(contender.join().unwrap());
    }
}
