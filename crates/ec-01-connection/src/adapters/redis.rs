use async_trait::async_trait;
use shared_cache::{KeyValueStore, RedisStore};
use std::sync::Arc;

use super::redact;
use crate::domain::ConnectionError;
use crate::ports::Connector;

/// Opens a Redis connection manager and verifies it with `PING`.
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Handle = Arc<dyn KeyValueStore>;

    fn target(&self) -> &'static str {
        "cache"
    }

    fn endpoint(&self) -> String {
        redact(&self.url)
    }

    async fn open(&self) -> Result<Self::Handle, ConnectionError> {
        let open_error = |reason: String| ConnectionError::Open {
            target: "cache",
            endpoint: self.endpoint(),
            reason,
        };
        let store = RedisStore::connect(&self.url)
            .await
            .map_err(|e| open_error(e.to_string()))?;
        store.ping().await.map_err(|e| open_error(e.to_string()))?;
        Ok(Arc::new(store))
    }

    async fn close(&self, _handle: &Self::Handle) -> Result<(), ConnectionError> {
        // The connection manager closes its socket when the last clone drops.
        Ok(())
    }
}
