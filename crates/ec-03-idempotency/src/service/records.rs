use shared_cache::{get_json, set_json, KeyValueStore};
use shared_types::StoreError;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{record_key, IdempotencyRecord};

/// Reads and writes idempotency records under `idempotent:<key>`.
#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl RecordStore {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        get_json(self.store.as_ref(), &record_key(key)).await
    }

    pub async fn put(&self, key: &str, record: &IdempotencyRecord) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), &record_key(key), record, Some(self.ttl)).await
    }
}
