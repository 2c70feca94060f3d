use async_trait::async_trait;
use shared_bus::{AmqpBroker, Broker};
use std::sync::Arc;

use super::redact;
use crate::domain::ConnectionError;
use crate::ports::Connector;

/// Opens an AMQP connection plus its publishing channel.
pub struct AmqpConnector {
    uri: String,
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Handle = Arc<dyn Broker>;

    fn target(&self) -> &'static str {
        "broker"
    }

    fn endpoint(&self) -> String {
        redact(&self.uri)
    }

    async fn open(&self) -> Result<Self::Handle, ConnectionError> {
        let broker = AmqpBroker::connect(&self.uri)
            .await
            .map_err(|e| ConnectionError::Open {
                target: self.target(),
                endpoint: self.endpoint(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(broker))
    }

    async fn close(&self, handle: &Self::Handle) -> Result<(), ConnectionError> {
        handle.close().await.map_err(|e| ConnectionError::Close {
            target: self.target(),
            reason: e.to_string(),
        })
    }
}
