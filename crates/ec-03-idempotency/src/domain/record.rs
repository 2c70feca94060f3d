use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::now_millis;

const RECORD_PREFIX: &str = "idempotent:";
const LOCK_PREFIX: &str = "lock:";

/// Store key holding the record for an idempotency key.
pub fn record_key(key: &str) -> String {
    format!("{RECORD_PREFIX}{key}")
}

/// Store key of the lock guarding `resource`.
pub fn lock_key(resource: &str) -> String {
    format!("{LOCK_PREFIX}{resource}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
}

/// Outcome of a successful first processing, replayed to later attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: RecordStatus,
    pub result: Value,
    /// Unix millis.
    pub processed_at: u64,
}

impl IdempotencyRecord {
    pub fn completed(result: Value) -> Self {
        Self {
            status: RecordStatus::Completed,
            result,
            processed_at: now_millis(),
        }
    }
}
