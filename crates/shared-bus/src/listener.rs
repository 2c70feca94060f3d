//! # Listener
//!
//! The consuming side of the broker. A `Listener` subscribes to one or more
//! queues and runs as a task that suspends on "next delivery available",
//! hands each delivery to a `DeliveryProcessor`, and settles it with the
//! returned `Outcome`. Processor panics are caught at this boundary and
//! become a nack; they never take the consumer down.
//!
//! Concurrency is bounded by the prefetch: with the default of 1 the listener
//! processes strictly one message at a time, preserving queue order.

use async_trait::async_trait;
use event_telemetry::metrics::{DELIVERIES, HANDLER_DURATION};
use futures::{FutureExt, StreamExt};
use shared_types::{BrokerError, MessageEnvelope};
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ConsumeOptions, Delivery, Outcome};
use crate::events::EventSchema;
use crate::DEFAULT_PREFETCH;

/// Why a handler did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// A dependency is temporarily unavailable; retrying may succeed.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The message can never be processed (malformed, missing key, business
    /// rule violation).
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Another worker holds the resource. Not a failure.
    #[error("Resource busy: {0}")]
    Contention(String),
}

impl HandlerError {
    pub fn transient(reason: impl ToString) -> Self {
        Self::Transient(reason.to_string())
    }

    pub fn permanent(reason: impl ToString) -> Self {
        Self::Permanent(reason.to_string())
    }

    pub fn contention(reason: impl ToString) -> Self {
        Self::Contention(reason.to_string())
    }
}

/// Result of a handler: a JSON value describing what was done.
pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Settlement for a handler result when no retry pipeline is involved.
///
/// | Result | Outcome |
/// |--------|---------|
/// | `Ok` | `Ack` |
/// | `Contention` | `Nack { requeue: true }` |
/// | `Transient` / `Permanent` | `Nack { requeue: false }` |
#[must_use]
pub fn outcome_for<T>(result: &Result<T, HandlerError>) -> Outcome {
    match result {
        Ok(_) => Outcome::Ack,
        Err(HandlerError::Contention(_)) => Outcome::Nack { requeue: true },
        Err(_) => Outcome::Nack { requeue: false },
    }
}

/// A decoded delivery.
#[derive(Debug, Clone)]
pub struct Message<E> {
    pub event: E,
    pub envelope: MessageEnvelope,
    pub queue: String,
    pub routing_key: String,
    pub redelivered: bool,
}

impl<E> Message<E> {
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.envelope.idempotency_key()
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.envelope.retry_count()
    }
}

/// Decode a delivery into a typed message. An undecodable payload is a
/// permanent failure.
pub fn decode<E: EventSchema>(delivery: &Delivery) -> Result<Message<E>, HandlerError> {
    let event = serde_json::from_slice::<E>(delivery.envelope.payload()).map_err(|e| {
        HandlerError::permanent(format!("malformed payload: {e}"))
    })?;
    Ok(Message {
        event,
        envelope: delivery.envelope.clone(),
        queue: delivery.queue.clone(),
        routing_key: delivery.routing_key.clone(),
        redelivered: delivery.redelivered,
    })
}

/// Business handler injected by a service.
#[async_trait]
pub trait MessageHandler<E: Send + Sync>: Send + Sync {
    async fn handle(&self, message: &Message<E>) -> HandlerResult;
}

#[async_trait]
impl<E, H> MessageHandler<E> for Arc<H>
where
    E: Send + Sync + 'static,
    H: MessageHandler<E> + ?Sized,
{
    async fn handle(&self, message: &Message<E>) -> HandlerResult {
        (**self).handle(message).await
    }
}

/// Turns a delivery into a settlement decision.
#[async_trait]
pub trait DeliveryProcessor: Send + Sync {
    async fn process(&self, delivery: &Delivery) -> Outcome;
}

/// Decode, call the handler, map the result with [`outcome_for`].
pub struct TypedProcessor<E, H> {
    handler: H,
    _schema: PhantomData<fn(E)>,
}

impl<E, H> TypedProcessor<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _schema: PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> DeliveryProcessor for TypedProcessor<E, H>
where
    E: EventSchema,
    H: MessageHandler<E>,
{
    async fn process(&self, delivery: &Delivery) -> Outcome {
        let result = match decode::<E>(delivery) {
            Ok(message) => self.handler.handle(&message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(
                queue = %delivery.queue,
                message_id = %delivery.envelope.message_id(),
                error = %e,
                "Handler failed"
            );
        }
        outcome_for(&result)
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Maximum deliveries processed concurrently across all queues.
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            consumer_tag: "listener".to_string(),
        }
    }
}

/// Counters for one listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub delivered: u64,
    pub acked: u64,
    pub nacked: u64,
    pub requeued: u64,
    pub settle_failures: u64,
}

#[derive(Default)]
struct StatCounters {
    delivered: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    requeued: AtomicU64,
    settle_failures: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}

/// Queue subscriber.
pub struct Listener {
    broker: Arc<dyn Broker>,
    queues: Vec<String>,
    config: ListenerConfig,
    stats: Arc<StatCounters>,
}

impl Listener {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queues: vec![queue.into()],
            config: ListenerConfig::default(),
            stats: Arc::new(StatCounters::default()),
        }
    }

    /// Also consume from another queue (e.g. the retry queue).
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    /// `listen(queue, handler)`: consume until shutdown is signalled or the
    /// delivery stream ends.
    ///
    /// On shutdown no new deliveries are taken and in-flight ones run to
    /// completion before this returns. A broken delivery stream is returned
    /// as an error after in-flight work has drained.
    pub async fn listen<P>(
        &self,
        processor: Arc<P>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ListenerStats, BrokerError>
    where
        P: DeliveryProcessor + 'static,
    {
        let mut streams = Vec::with_capacity(self.queues.len());
        for queue in &self.queues {
            let options = ConsumeOptions {
                prefetch: self.config.prefetch,
                consumer_tag: format!("{}:{}", self.config.consumer_tag, queue),
            };
            streams.push(self.broker.consume(queue, options).await?);
        }
        let mut deliveries = futures::stream::select_all(streams);

        let slots = u32::from(self.config.prefetch.max(1));
        let permits = Arc::new(Semaphore::new(slots as usize));
        let mut stream_error = None;

        info!(queues = ?self.queues, prefetch = slots, "Listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(error = %e, "Delivery stream failed");
                    stream_error = Some(e);
                    break;
                }
                None => {
                    info!(queues = ?self.queues, "Delivery stream ended");
                    break;
                }
            };

            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            let processor = Arc::clone(&processor);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let _permit = permit;
                process_one(processor.as_ref(), delivery, &stats).await;
            });
        }

        // Wait for in-flight deliveries to settle.
        if let Ok(all) = permits.acquire_many(slots).await {
            drop(all);
        }
        drop(deliveries);

        let stats = self.stats.snapshot();
        info!(
            queues = ?self.queues,
            delivered = stats.delivered,
            acked = stats.acked,
            nacked = stats.nacked,
            requeued = stats.requeued,
            "Listener stopped"
        );
        match stream_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

async fn process_one<P: DeliveryProcessor + ?Sized>(
    processor: &P,
    delivery: Delivery,
    stats: &StatCounters,
) {
    let timer = HANDLER_DURATION
        .with_label_values(&[delivery.queue.as_str()])
        .start_timer();
    let outcome = match AssertUnwindSafe(processor.process(&delivery))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(
                queue = %delivery.queue,
                message_id = %delivery.envelope.message_id(),
                "Processor panicked, rejecting delivery"
            );
            Outcome::Nack { requeue: false }
        }
    };
    timer.observe_duration();

    match delivery.settle(outcome).await {
        Ok(()) => {
            let counter = match outcome {
                Outcome::Ack => &stats.acked,
                Outcome::Nack { requeue: true } => &stats.requeued,
                Outcome::Nack { requeue: false } => &stats.nacked,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            DELIVERIES
                .with_label_values(&[delivery.queue.as_str(), outcome.label()])
                .inc();
            debug!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                message_id = %delivery.envelope.message_id(),
                outcome = outcome.label(),
                "Delivery settled"
            );
        }
        Err(e) => {
            stats.settle_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = %delivery.queue,
                message_id = %delivery.envelope.message_id(),
                error = %e,
                "Failed to settle delivery"
            );
        }
    }
}
