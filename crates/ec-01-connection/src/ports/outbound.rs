//! # Outbound Ports (Driven Ports)
//!
//! What the Connection Manager needs from a concrete client library.

use async_trait::async_trait;

use crate::domain::ConnectionError;

/// Opens and closes one kind of connection.
///
/// Production: `AmqpConnector`, `RedisConnector`
/// Testing: `MemoryBrokerConnector`, `MemoryStoreConnector`
#[async_trait]
pub trait Connector: Send + Sync {
    /// The shared handle components receive, e.g. `Arc<dyn Broker>`.
    type Handle: Clone + Send + Sync + 'static;

    /// Short label for logs and metrics (`broker`, `cache`).
    fn target(&self) -> &'static str;

    /// Endpoint for logs. Must not contain credentials.
    fn endpoint(&self) -> String;

    /// One connection attempt.
    async fn open(&self) -> Result<Self::Handle, ConnectionError>;

    /// Close a handle previously returned by `open`.
    async fn close(&self, handle: &Self::Handle) -> Result<(), ConnectionError>;
}
