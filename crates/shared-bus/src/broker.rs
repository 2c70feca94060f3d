//! # Broker Port
//!
//! The seam between the event core and the message broker. Components
//! receive an `Arc<dyn Broker>` in their constructor; there is no
//! process-wide channel.
//!
//! ## Delivery Lifecycle
//!
//! ```text
//! consume() ──► Delivery ──► settle(Outcome::Ack)                 ──► removed
//!                         └─► settle(Outcome::Nack{requeue:true})  ──► back on queue
//!                         └─► settle(Outcome::Nack{requeue:false}) ──► dead-lettered
//!                         └─► dropped unsettled + consumer gone    ──► redelivered
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;
use shared_types::{BrokerError, ExchangeSpec, MessageEnvelope, QueueSpec};
use std::fmt;

use crate::DEFAULT_PREFETCH;

/// Explicit settlement decision for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processing finished; remove the message.
    Ack,
    /// Processing did not finish. With `requeue` the message goes back on its
    /// queue; without, the broker dead-letters it.
    Nack { requeue: bool },
}

impl Outcome {
    /// Label used in metrics and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack { requeue: true } => "requeue",
            Self::Nack { requeue: false } => "nack",
        }
    }
}

/// Options for a publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Wait for the broker to confirm the message before returning.
    pub confirm: bool,
}

impl PublishOptions {
    #[must_use]
    pub fn confirmed() -> Self {
        Self { confirm: true }
    }
}

/// Options for a consumer registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Maximum unsettled deliveries held by this consumer.
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            consumer_tag: format!("consumer-{}", uuid::Uuid::new_v4()),
        }
    }
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message handed to a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    pub envelope: MessageEnvelope,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        redelivered: bool,
        envelope: MessageEnvelope,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            delivery_tag,
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered,
            envelope,
            acker,
        }
    }

    /// Apply an outcome.
    pub async fn settle(&self, outcome: Outcome) -> Result<(), BrokerError> {
        match outcome {
            Outcome::Ack => self.acker.ack().await,
            Outcome::Nack { requeue } => self.acker.nack(requeue).await,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("queue", &self.queue)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.envelope.message_id())
            .finish()
    }
}

/// Push-based stream of deliveries for one consumer. Dropping the stream
/// cancels the consumer and returns its unsettled deliveries to the queue.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Operations the event core needs from a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare an exchange. Identical re-declaration is a no-op.
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Declare a queue and its bindings. Identical re-declaration is a
    /// no-op; bindings are never duplicated.
    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError>;

    /// Publish to an exchange. Unroutable messages are dropped.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
        options: PublishOptions,
    ) -> Result<(), BrokerError>;

    /// Register a consumer on a queue.
    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError>;

    /// Close the channel and connection. Open delivery streams end.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}
