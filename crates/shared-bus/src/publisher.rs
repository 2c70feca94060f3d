//! # Publisher
//!
//! One generic publisher parameterized by the event schema. It serializes the
//! event, stamps the envelope headers and publishes to its exchange.
//!
//! Messages are marked persistent when the exchange is durable. By default
//! the publisher does not wait for a broker confirmation; at-least-once then
//! rests on the broker persisting durable messages. `PublishMode::Confirmed`
//! makes every publish wait for the broker's confirm.

use event_telemetry::metrics::{MESSAGES_PUBLISHED, PUBLISH_FAILURES};
use shared_types::{
    is_reserved_header, BrokerError, ExchangeSpec, MessageEnvelope, CONTENT_TYPE_JSON,
    HEADER_EVENT_TYPE, HEADER_ORIGINAL_ROUTING_KEY,
};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::broker::{Broker, PublishOptions};
use crate::events::EventSchema;

/// Whether a publish waits for the broker's confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    #[default]
    FireAndForget,
    Confirmed,
}

/// Per-publish metadata supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishContext {
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl PublishContext {
    /// Context carrying an idempotency key.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            idempotency_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Context with a freshly generated idempotency key, one per business
    /// operation.
    #[must_use]
    pub fn generated() -> Self {
        Self::with_key(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Typed publisher bound to one exchange.
pub struct Publisher<E> {
    broker: Arc<dyn Broker>,
    exchange: ExchangeSpec,
    mode: PublishMode,
    published: AtomicU64,
    _schema: PhantomData<fn(E)>,
}

impl<E: EventSchema> Publisher<E> {
    pub fn new(broker: Arc<dyn Broker>, exchange: ExchangeSpec) -> Self {
        Self {
            broker,
            exchange,
            mode: PublishMode::default(),
            published: AtomicU64::new(0),
            _schema: PhantomData,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    #[must_use]
    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Total successful publishes.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Build the envelope for an event without publishing it.
    ///
    /// Caller headers named like reserved ones (`x-*`, `idempotency-key`)
    /// are dropped; those are set here or by the retry pipeline.
    pub fn envelope(
        &self,
        event: &E,
        routing_key: &str,
        context: &PublishContext,
    ) -> Result<MessageEnvelope, BrokerError> {
        let payload = serde_json::to_vec(event)?;
        let mut envelope = MessageEnvelope::new(payload)
            .with_content_type(CONTENT_TYPE_JSON)
            .with_header(HEADER_EVENT_TYPE, event.event_type())
            .with_header(HEADER_ORIGINAL_ROUTING_KEY, routing_key)
            .persistent(self.exchange.durable);

        for (key, value) in &context.headers {
            if is_reserved_header(key) {
                warn!(header = %key, exchange = %self.exchange.name, "Reserved header ignored");
                continue;
            }
            envelope = envelope.with_header(key.clone(), value.clone());
        }
        if let Some(key) = &context.idempotency_key {
            envelope = envelope.with_idempotency_key(key.clone());
        }
        if let Some(id) = &context.correlation_id {
            envelope = envelope.with_correlation_id(id.clone());
        }
        Ok(envelope)
    }

    /// Publish under the event's own routing key.
    pub async fn publish(&self, event: &E, context: PublishContext) -> Result<Uuid, BrokerError> {
        let routing_key = event.routing_key();
        self.publish_with_key(&routing_key, event, context).await
    }

    /// `publish(exchange, routingKey, event)` with an explicit routing key.
    pub async fn publish_with_key(
        &self,
        routing_key: &str,
        event: &E,
        context: PublishContext,
    ) -> Result<Uuid, BrokerError> {
        let envelope = self.envelope(event, routing_key, &context)?;
        let message_id = envelope.message_id();
        let options = PublishOptions {
            confirm: self.mode == PublishMode::Confirmed,
        };

        match self
            .broker
            .publish(&self.exchange.name, routing_key, envelope, options)
            .await
        {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                MESSAGES_PUBLISHED
                    .with_label_values(&[self.exchange.name.as_str()])
                    .inc();
                debug!(
                    exchange = %self.exchange.name,
                    routing_key,
                    event_type = event.event_type(),
                    %message_id,
                    idempotency_key = context.idempotency_key.as_deref().unwrap_or("-"),
                    "Event published"
                );
                Ok(message_id)
            }
            Err(e) => {
                PUBLISH_FAILURES
                    .with_label_values(&[self.exchange.name.as_str()])
                    .inc();
                Err(e)
            }
        }
    }

    /// Publish and log a failure instead of returning it.
    pub async fn publish_best_effort(&self, event: &E, context: PublishContext) -> Option<Uuid> {
        match self.publish(event, context).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    exchange = %self.exchange.name,
                    event_type = event.event_type(),
                    error = %e,
                    "Event publish failed, continuing"
                );
                None
            }
        }
    }
}
