//! # Store Port
//!
//! Abstract interface for the key-value store.
//!
//! Production: `RedisStore` (feature `redis`)
//! Testing: `InMemoryStore`

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::StoreError;
use std::time::Duration;

/// Async key-value store with per-key expiry.
///
/// Keys and values are strings; structured values are JSON (see
/// [`get_json`] / [`set_json`]).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value, replacing any existing one. `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Set only if the key does not exist. Returns whether the value was set.
    ///
    /// ## Atomicity
    ///
    /// At most one of any number of concurrent callers observes `true`.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete keys. Returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Delete `key` only if its current value equals `expected`, as one
    /// atomic step. Returns whether it was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Increment an integer counter, creating it at 1. `ttl` applies only
    /// when the counter is created.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Round-trip health check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Read and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}
