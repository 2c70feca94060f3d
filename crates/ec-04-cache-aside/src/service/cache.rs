use event_telemetry::metrics::{CACHE_INVALIDATIONS, CACHE_LOOKUPS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_cache::KeyValueStore;
use shared_types::StoreError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::namespace_prefix;

/// Hit/miss counters of one [`CacheAside`] instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that failed against the store and fell through to the loader.
    pub errors: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses + self.errors
    }

    /// Share of lookups served from the cache, `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Cache-aside over a [`KeyValueStore`].
///
/// Reads check the cache and fall through to a loader on a miss. Writes
/// delete the affected keys after the authoritative store has changed. The
/// store is never required for correctness: any store failure on the read
/// path behaves as a miss.
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    counters: Counters,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Return the cached value for `key`, or load, cache and return it.
    ///
    /// The loader runs only on a miss. Its errors are returned unchanged and
    /// nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.put(key, &value, ttl).await;
        Ok(value)
    }

    /// Like [`get_or_load`](Self::get_or_load), but a `None` from the loader
    /// (entity not found, empty search) is not cached.
    pub async fn get_or_load_optional<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>, E>> + Send,
    {
        if let Some(value) = self.get(key).await {
            return Ok(Some(value));
        }
        let value = loader().await?;
        if let Some(found) = &value {
            self.put(key, found, ttl).await;
        }
        Ok(value)
    }

    /// Cached value, if present and readable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.record("hit", &self.counters.hits);
                    debug!(key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    // Stale schema; the loader result will overwrite it.
                    self.record("miss", &self.counters.misses);
                    warn!(key, error = %e, "Undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                self.record("miss", &self.counters.misses);
                debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                self.record("error", &self.counters.errors);
                warn!(key, error = %e, "Cache read failed, falling through");
                None
            }
        }
    }

    /// Store a value. Failures are logged and ignored.
    pub async fn put<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Value not cacheable");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw, Some(ttl)).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Delete keys. Returns how many existed.
    pub async fn invalidate(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.del(keys).await?;
        CACHE_INVALIDATIONS.inc_by(removed as f64);
        debug!(keys = ?keys, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Delete every key in `namespace`, e.g. all cached search results.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64, StoreError> {
        let keys = self.store.scan_prefix(&namespace_prefix(namespace)).await?;
        self.invalidate(&keys).await
    }

    /// Run an authoritative write, then invalidate `keys` and every key in
    /// `namespaces`.
    ///
    /// Invalidation happens only after the write succeeded. An invalidation
    /// failure is logged; the write result is still returned and the
    /// entries age out with their TTL.
    pub async fn write_and_invalidate<T, E, F, Fut>(
        &self,
        keys: &[String],
        namespaces: &[&str],
        write: F,
    ) -> Result<T, E>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let written = write().await?;
        if let Err(e) = self.invalidate(keys).await {
            warn!(keys = ?keys, error = %e, "Invalidation failed after write");
        }
        for namespace in namespaces {
            if let Err(e) = self.invalidate_namespace(namespace).await {
                warn!(namespace, error = %e, "Namespace invalidation failed after write");
            }
        }
        Ok(written)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
    }

    fn record(&self, result: &str, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        CACHE_LOOKUPS.with_label_values(&[result]).inc();
    }
}
