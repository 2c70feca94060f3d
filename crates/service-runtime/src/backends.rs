//! Backend selection.
//!
//! The URL scheme picks a connector; each enum arm owns the
//! `ConnectionManager` for that connector so the runtime can close it on
//! shutdown without knowing which backend is in use.

use ec_01_connection::{
    ConnectionError, ConnectionManager, MemoryBrokerConnector, MemoryStoreConnector,
    ReconnectPolicy,
};
#[cfg(feature = "amqp")]
use ec_01_connection::AmqpConnector;
#[cfg(feature = "redis")]
use ec_01_connection::RedisConnector;
use shared_bus::{Broker, InMemoryBroker};
use shared_cache::{InMemoryStore, KeyValueStore};
use std::sync::Arc;

use crate::config::{BrokerBackend, CacheBackend};

pub enum BrokerConnection {
    Memory(ConnectionManager<MemoryBrokerConnector>),
    #[cfg(feature = "amqp")]
    Amqp(ConnectionManager<AmqpConnector>),
}

impl BrokerConnection {
    pub fn from_backend(backend: BrokerBackend, policy: ReconnectPolicy) -> Self {
        match backend {
            BrokerBackend::Memory => Self::memory(InMemoryBroker::new(), policy),
            #[cfg(feature = "amqp")]
            BrokerBackend::Amqp(uri) => {
                Self::Amqp(ConnectionManager::new(AmqpConnector::new(uri), policy))
            }
            // Rejected by RuntimeConfig::validate in builds without amqp.
            #[cfg(not(feature = "amqp"))]
            BrokerBackend::Amqp(_) => Self::memory(InMemoryBroker::new(), policy),
        }
    }

    /// Use an existing in-memory broker, e.g. one shared with a test.
    pub fn memory(broker: InMemoryBroker, policy: ReconnectPolicy) -> Self {
        Self::Memory(ConnectionManager::new(
            MemoryBrokerConnector::new(broker),
            policy,
        ))
    }

    pub async fn connect(&self) -> Result<Arc<dyn Broker>, ConnectionError> {
        match self {
            Self::Memory(manager) => manager.connect().await,
            #[cfg(feature = "amqp")]
            Self::Amqp(manager) => manager.connect().await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Memory(manager) => manager.is_connected(),
            #[cfg(feature = "amqp")]
            Self::Amqp(manager) => manager.is_connected(),
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Memory(manager) => manager.generation(),
            #[cfg(feature = "amqp")]
            Self::Amqp(manager) => manager.generation(),
        }
    }

    /// Replace a handle of generation `seen` that stopped delivering.
    pub async fn reconnect_from(&self, seen: u64) -> Result<Arc<dyn Broker>, ConnectionError> {
        match self {
            Self::Memory(manager) => manager.reconnect_from(seen).await,
            #[cfg(feature = "amqp")]
            Self::Amqp(manager) => manager.reconnect_from(seen).await,
        }
    }

    pub async fn close(&self) -> Result<(), ConnectionError> {
        match self {
            Self::Memory(manager) => manager.close().await,
            #[cfg(feature = "amqp")]
            Self::Amqp(manager) => manager.close().await,
        }
    }
}

pub enum StoreConnection {
    Memory(ConnectionManager<MemoryStoreConnector>),
    #[cfg(feature = "redis")]
    Redis(ConnectionManager<RedisConnector>),
}

impl StoreConnection {
    pub fn from_backend(backend: CacheBackend, policy: ReconnectPolicy) -> Self {
        match backend {
            CacheBackend::Memory => Self::memory(InMemoryStore::new(), policy),
            #[cfg(feature = "redis")]
            CacheBackend::Redis(url) => {
                Self::Redis(ConnectionManager::new(RedisConnector::new(url), policy))
            }
            #[cfg(not(feature = "redis"))]
            CacheBackend::Redis(_) => Self::memory(InMemoryStore::new(), policy),
        }
    }

    pub fn memory(store: InMemoryStore, policy: ReconnectPolicy) -> Self {
        Self::Memory(ConnectionManager::new(
            MemoryStoreConnector::new(store),
            policy,
        ))
    }

    pub async fn connect(&self) -> Result<Arc<dyn KeyValueStore>, ConnectionError> {
        match self {
            Self::Memory(manager) => manager.connect().await,
            #[cfg(feature = "redis")]
            Self::Redis(manager) => manager.connect().await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Memory(manager) => manager.is_connected(),
            #[cfg(feature = "redis")]
            Self::Redis(manager) => manager.is_connected(),
        }
    }

    pub async fn close(&self) -> Result<(), ConnectionError> {
        match self {
            Self::Memory(manager) => manager.close().await,
            #[cfg(feature = "redis")]
            Self::Redis(manager) => manager.close().await,
        }
    }
}
