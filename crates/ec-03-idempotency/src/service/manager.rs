use event_telemetry::metrics::IDEMPOTENT_REPLAYS;
use futures::FutureExt;
use serde_json::Value;
use shared_bus::HandlerError;
use shared_cache::KeyValueStore;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::lock::{panic_message, LockManager};
use super::records::RecordStore;
use crate::domain::{IdempotencyConfig, IdempotencyError, IdempotencyRecord};

/// How a call to [`IdempotencyManager::execute`] was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// The operation ran now.
    Fresh(Value),
    /// A previous run's result, served from the record.
    Replayed(IdempotencyRecord),
}

impl Execution {
    pub fn result(&self) -> &Value {
        match self {
            Self::Fresh(value) => value,
            Self::Replayed(record) => &record.result,
        }
    }

    pub fn into_result(self) -> Value {
        match self {
            Self::Fresh(value) => value,
            Self::Replayed(record) => record.result,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Runs an operation at most once per idempotency key.
pub struct IdempotencyManager {
    records: RecordStore,
    locks: LockManager,
}

impl IdempotencyManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: IdempotencyConfig) -> Self {
        Self {
            records: RecordStore::new(Arc::clone(&store), config.record_ttl),
            locks: LockManager::new(store, config.lock),
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Run `operation` unless `key` already has a record.
    ///
    /// Only successful results are recorded; a failed or panicked run leaves
    /// the key free for the next delivery.
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> Result<Execution, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, HandlerError>> + Send,
    {
        if key.trim().is_empty() {
            return Err(IdempotencyError::MissingKey);
        }

        if let Some(record) = self.lookup(key).await {
            return Ok(self.replay(key, record));
        }

        let resource = format!("idempotency:{key}");
        let lock = self
            .locks
            .acquire_with_retry(&resource)
            .await?
            .ok_or(IdempotencyError::Contention { resource })?;

        // Another worker may have finished between the lookup and the lock.
        if let Some(record) = self.lookup(key).await {
            self.release(lock).await;
            return Ok(self.replay(key, record));
        }

        let outcome = AssertUnwindSafe(operation()).catch_unwind().await;

        let record = match &outcome {
            Ok(Ok(result)) => Some(IdempotencyRecord::completed(result.clone())),
            _ => None,
        };
        if let Some(record) = record {
            match self.records.put(key, &record).await {
                Ok(()) => info!(key, "Processed"),
                // The side effect happened; a later duplicate will run again.
                Err(e) => warn!(key, error = %e, "Processed but record not stored"),
            }
        }
        self.release(lock).await;

        match outcome {
            Ok(Ok(result)) => Ok(Execution::Fresh(result)),
            Ok(Err(e)) => {
                debug!(key, error = %e, "Operation failed, nothing recorded");
                Err(IdempotencyError::Handler(e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(key, panic = %message, "Operation panicked");
                Err(IdempotencyError::Panicked(message))
            }
        }
    }

    /// A failed read counts as a miss; the lock still guards the operation.
    async fn lookup(&self, key: &str) -> Option<IdempotencyRecord> {
        match self.records.get(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "Record lookup failed, treating as new");
                None
            }
        }
    }

    fn replay(&self, key: &str, record: IdempotencyRecord) -> Execution {
        IDEMPOTENT_REPLAYS.inc();
        info!(key, processed_at = record.processed_at, "Duplicate, replaying result");
        Execution::Replayed(record)
    }

    async fn release(&self, lock: super::LockToken) {
        let key = lock.key().to_string();
        if let Err(e) = self.locks.release(lock).await {
            warn!(key = %key, error = %e, "Lock release failed, waiting for expiry");
        }
    }
}
