use event_telemetry::metrics::LOCK_ACQUISITIONS;
use futures::FutureExt;
use rand::Rng;
use shared_cache::KeyValueStore;
use shared_types::StoreError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{lock_key, IdempotencyError, LockConfig};

/// Proof of lock ownership. Hand it back to [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    token: String,
}

impl LockToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Distributed mutual exclusion over a [`KeyValueStore`].
///
/// A lock is a key holding a random token, created with `SET NX` and a TTL.
/// Release deletes the key only while it still holds the caller's token, so
/// a holder whose lock expired can never free a successor's lock.
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Single attempt. `Ok(None)` when someone else holds the lock.
    pub async fn try_acquire(&self, resource: &str) -> Result<Option<LockToken>, StoreError> {
        let candidate = LockToken {
            key: lock_key(resource),
            token: Uuid::new_v4().to_string(),
        };
        let acquired = self.attempt(&candidate).await?;
        record_outcome(if acquired { "acquired" } else { "contended" });
        Ok(acquired.then_some(candidate))
    }

    /// Acquire with exponential backoff and jitter.
    ///
    /// Gives up with `Ok(None)` after `max_attempts` or once the next delay
    /// would cross `total_timeout`. A store failure aborts immediately.
    pub async fn acquire_with_retry(&self, resource: &str) -> Result<Option<LockToken>, StoreError> {
        let candidate = LockToken {
            key: lock_key(resource),
            token: Uuid::new_v4().to_string(),
        };
        let deadline = Instant::now() + self.config.total_timeout;
        let mut timed_out = false;

        for attempt in 0..self.config.max_attempts {
            match timeout(self.config.attempt_timeout, self.attempt(&candidate)).await {
                Ok(Ok(true)) => {
                    record_outcome("acquired");
                    debug!(key = %candidate.key, attempt, "Lock acquired");
                    return Ok(Some(candidate));
                }
                Ok(Ok(false)) if timed_out => {
                    // An attempt that timed out may still have landed.
                    if self.store.get(&candidate.key).await?.as_deref() == Some(candidate.token.as_str()) {
                        record_outcome("acquired");
                        return Ok(Some(candidate));
                    }
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    record_outcome("error");
                    return Err(e);
                }
                Err(_) => {
                    timed_out = true;
                    warn!(
                        key = %candidate.key,
                        attempt,
                        timeout_ms = self.config.attempt_timeout.as_millis() as u64,
                        "Lock attempt timed out"
                    );
                }
            }

            if attempt + 1 == self.config.max_attempts {
                break;
            }
            let delay = self.backoff(attempt);
            if Instant::now() + delay >= deadline {
                break;
            }
            tokio::time::sleep(delay).await;
        }

        record_outcome("contended");
        debug!(key = %candidate.key, "Lock not acquired");
        Ok(None)
    }

    /// Release a held lock. Returns `false` if it had already expired or
    /// passed to another holder.
    pub async fn release(&self, lock: LockToken) -> Result<bool, StoreError> {
        let released = self.store.compare_and_delete(&lock.key, &lock.token).await?;
        if !released {
            warn!(key = %lock.key, "Lock expired before release");
        }
        Ok(released)
    }

    /// Run `f` while holding the lock on `resource`.
    ///
    /// The lock is released on every path, including a panic inside `f`.
    pub async fn with_lock<F, Fut, T>(&self, resource: &str, f: F) -> Result<T, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let lock = self
            .acquire_with_retry(resource)
            .await?
            .ok_or_else(|| IdempotencyError::Contention {
                resource: resource.to_string(),
            })?;

        let result = AssertUnwindSafe(f()).catch_unwind().await;
        if let Err(e) = self.release(lock).await {
            warn!(resource, error = %e, "Lock release failed, waiting for expiry");
        }
        result.map_err(|panic| IdempotencyError::Panicked(panic_message(panic.as_ref())))
    }

    async fn attempt(&self, candidate: &LockToken) -> Result<bool, StoreError> {
        self.store
            .set_nx(&candidate.key, &candidate.token, self.config.ttl)
            .await
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let jitter_ms = self.config.max_jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        self.config.base_delay.saturating_mul(factor) + jitter
    }
}

fn record_outcome(outcome: &str) {
    LOCK_ACQUISITIONS.with_label_values(&[outcome]).inc();
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_cache::InMemoryStore;

    fn manager(store: &InMemoryStore, config: LockConfig) -> LockManager {
        LockManager::new(Arc::new(store.clone()), config)
    }

    #[tokio::test]
    async fn test_second_acquire_is_contended() {
        let store = InMemoryStore::new();
        let locks = manager(&store, LockConfig::default());

        let held = locks.try_acquire("product:1").await.unwrap().unwrap();
        assert_eq!(held.key(), "lock:product:1");
        assert!(locks.try_acquire("product:1").await.unwrap().is_none());
        // Different resources do not interfere.
        assert!(locks.try_acquire("product:2").await.unwrap().is_some());

        assert!(locks.release(held).await.unwrap());
        assert!(locks.try_acquire("product:1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_holder_cannot_release_successor() {
        let store = InMemoryStore::new();
        let config = LockConfig {
            ttl: Duration::from_secs(1),
            ..LockConfig::default()
        };
        let locks = manager(&store, config);

        let stale = locks.try_acquire("r").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let current = locks.try_acquire("r").await.unwrap().unwrap();

        assert!(!locks.release(stale).await.unwrap());
        assert_eq!(store.get("lock:r").await.unwrap().as_deref(), Some(current.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let store = InMemoryStore::new();
        let locks = manager(&store, LockConfig::default());
        let _held = locks.try_acquire("r").await.unwrap().unwrap();

        let start = Instant::now();
        assert!(locks.acquire_with_retry("r").await.unwrap().is_none());
        // Four delays: 100 + 200 + 400 + 800 ms plus at most 100ms jitter each.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1_500));
        assert!(elapsed <= Duration::from_millis(1_900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_when_holder_releases() {
        let store = InMemoryStore::new();
        let locks = Arc::new(manager(&store, LockConfig::default()));
        let held = locks.try_acquire("r").await.unwrap().unwrap();

        let releaser = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(250)).await;
                locks.release(held).await.unwrap();
            })
        };

        assert!(locks.acquire_with_retry("r").await.unwrap().is_some());
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn test_store_outage_is_an_error() {
        let store = InMemoryStore::new();
        store.set_available(false);
        let locks = manager(&store, LockConfig::default());
        assert!(matches!(
            locks.acquire_with_retry("r").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_panic() {
        let store = InMemoryStore::new();
        let locks = manager(&store, LockConfig::default());

        let result: Result<(), _> = locks
            .with_lock("r", || async {
                panic!("boom");
            })
            .await;
        assert_eq!(result, Err(IdempotencyError::Panicked("boom".to_string())));
        assert_eq!(store.get("lock:r").await.unwrap(), None);

        assert_eq!(locks.with_lock("r", || async { 7 }).await, Ok(7));
    }
}
