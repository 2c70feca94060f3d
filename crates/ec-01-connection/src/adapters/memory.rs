use async_trait::async_trait;
use shared_bus::{Broker, InMemoryBroker};
use shared_cache::{InMemoryStore, KeyValueStore};
use std::sync::Arc;

use crate::domain::ConnectionError;
use crate::ports::Connector;

/// Hands out a shared in-process broker.
#[derive(Clone, Default)]
pub struct MemoryBrokerConnector {
    broker: InMemoryBroker,
}

impl MemoryBrokerConnector {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryBrokerConnector {
    type Handle = Arc<dyn Broker>;

    fn target(&self) -> &'static str {
        "broker"
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn open(&self) -> Result<Self::Handle, ConnectionError> {
        if !self.broker.is_open() {
            return Err(ConnectionError::Open {
                target: self.target(),
                endpoint: self.endpoint(),
                reason: "broker closed".to_string(),
            });
        }
        Ok(Arc::new(self.broker.clone()))
    }

    async fn close(&self, handle: &Self::Handle) -> Result<(), ConnectionError> {
        handle.close().await.map_err(|e| ConnectionError::Close {
            target: self.target(),
            reason: e.to_string(),
        })
    }
}

/// Hands out a shared in-process key-value store.
#[derive(Clone, Default)]
pub struct MemoryStoreConnector {
    store: InMemoryStore,
}

impl MemoryStoreConnector {
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryStoreConnector {
    type Handle = Arc<dyn KeyValueStore>;

    fn target(&self) -> &'static str {
        "cache"
    }

    fn endpoint(&self) -> String {
        "memory://".to_string()
    }

    async fn open(&self) -> Result<Self::Handle, ConnectionError> {
        self.store.ping().await.map_err(|e| ConnectionError::Open {
            target: self.target(),
            endpoint: self.endpoint(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(self.store.clone()))
    }

    async fn close(&self, _handle: &Self::Handle) -> Result<(), ConnectionError> {
        Ok(())
    }
}
