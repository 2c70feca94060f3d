//! # In-Memory Broker
//!
//! A single-process broker with the AMQP semantics the event core relies on:
//!
//! - exchanges of every kind with durable/transient flags
//! - idempotent declarations, set-semantics bindings
//! - per-queue FIFO with prefetch-bounded consumers
//! - ack, nack-with-requeue and nack-to-dead-letter
//! - `x-message-ttl` expiry that dead-letters through `x-dead-letter-exchange`
//! - redelivery of unsettled messages when a consumer goes away
//!
//! Used by tests and by `memory://` deployments. TTL timers run on the tokio
//! clock, so paused-time tests advance them deterministically.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use shared_types::{
    BrokerError, ExchangeSpec, MessageEnvelope, QueueSpec, HEADER_DEATH_QUEUE,
    HEADER_DEATH_REASON,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::broker::{
    Acker, Broker, ConsumeOptions, Delivery, DeliveryStream, PublishOptions,
};
use crate::routing;

/// In-memory implementation of the broker port.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<BrokerState>,
    closed: AtomicBool,
    published: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    /// `(exchange, pattern, queue)`
    bindings: BTreeSet<(String, String, String)>,
    next_seq: u64,
    next_tag: u64,
    next_consumer: u64,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, InFlight>,
    notify: Arc<Notify>,
}

#[derive(Clone)]
struct StoredMessage {
    seq: u64,
    exchange: String,
    routing_key: String,
    redelivered: bool,
    envelope: MessageEnvelope,
}

struct InFlight {
    consumer_id: u64,
    message: StoredMessage,
}

/// Side effects collected under the lock and applied after it is released.
struct Enqueued {
    queue: String,
    seq: u64,
    ttl: Option<Duration>,
    notify: Arc<Notify>,
}

enum Settlement {
    Ack,
    Requeue,
    Reject,
}

enum Take {
    Delivery(Delivery),
    Empty,
    Closed,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Messages ready for delivery on a queue.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        let state = self.shared.state.lock();
        state.queues.get(queue).map(|q| q.ready.len())
    }

    /// Messages delivered to a consumer but not yet settled.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        let state = self.shared.state.lock();
        state.queues.get(queue).map(|q| q.unacked.len())
    }

    /// Snapshot of the ready messages on a queue, head first.
    #[must_use]
    pub fn peek(&self, queue: &str) -> Vec<MessageEnvelope> {
        let state = self.shared.state.lock();
        state
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.envelope.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop every ready message on a queue. Returns how many were removed.
    pub fn purge(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut state = self.shared.state.lock();
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let purged = queue_state.ready.len();
        queue_state.ready.clear();
        Ok(purged)
    }

    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.shared.state.lock().exchanges.len()
    }

    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.shared.state.lock().queues.len()
    }

    /// Number of distinct `(exchange, pattern, queue)` bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.shared.state.lock().bindings.len()
    }

    /// Accept connections again after `close`, as a restarted broker with
    /// durable state would: declared topology and stored messages survive.
    pub fn reopen(&self) {
        if self.shared.closed.swap(false, Ordering::AcqRel) {
            debug!("In-memory broker reopened");
        }
    }

    /// Total publish calls accepted.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();

        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing == exchange => Ok(()),
            Some(existing) => Err(BrokerError::PreconditionFailed {
                name: exchange.name.clone(),
                reason: format!(
                    "exists as {} (durable={}), declared as {} (durable={})",
                    existing.kind, existing.durable, exchange.kind, exchange.durable
                ),
            }),
            None => {
                debug!(exchange = %exchange.name, kind = %exchange.kind, "Exchange declared");
                state
                    .exchanges
                    .insert(exchange.name.clone(), exchange.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();

        // Validate everything before mutating anything.
        if let Some(missing) = queue
            .referenced_exchanges()
            .find(|name| !state.exchanges.contains_key(*name))
        {
            return Err(BrokerError::ExchangeNotFound(missing.to_string()));
        }
        if let Some(existing) = state.queues.get(&queue.name) {
            if !existing.spec.same_arguments(queue) {
                return Err(BrokerError::PreconditionFailed {
                    name: queue.name.clone(),
                    reason: "queue exists with different arguments".to_string(),
                });
            }
        } else {
            debug!(queue = %queue.name, durable = queue.durable, "Queue declared");
            state.queues.insert(
                queue.name.clone(),
                QueueState {
                    spec: queue.clone(),
                    ready: VecDeque::new(),
                    unacked: HashMap::new(),
                    notify: Arc::new(Notify::new()),
                },
            );
        }

        for binding in &queue.bindings {
            let added = state.bindings.insert((
                binding.exchange.clone(),
                binding.pattern.clone(),
                queue.name.clone(),
            ));
            if added {
                trace!(
                    queue = %queue.name,
                    exchange = %binding.exchange,
                    pattern = %binding.pattern,
                    "Binding added"
                );
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
        _options: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut effects = Vec::new();
        let routed = {
            let mut state = self.shared.state.lock();
            state.route(exchange, routing_key, envelope, &mut effects)?
        };
        self.shared.published.fetch_add(1, Ordering::Relaxed);

        if routed == 0 {
            debug!(exchange, routing_key, "Message unroutable, dropped");
        }
        Shared::apply(&self.shared, effects);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let (consumer_id, notify) = {
            let mut state = self.shared.state.lock();
            state.next_consumer += 1;
            let consumer_id = state.next_consumer;
            let queue_state = state
                .queues
                .get(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            (consumer_id, Arc::clone(&queue_state.notify))
        };

        debug!(
            queue,
            consumer_tag = %options.consumer_tag,
            prefetch = options.prefetch,
            "Consumer registered"
        );

        let cursor = ConsumerCursor {
            shared: Arc::clone(&self.shared),
            queue: queue.to_string(),
            consumer_id,
            prefetch: if options.prefetch == 0 {
                usize::MAX
            } else {
                usize::from(options.prefetch)
            },
            notify,
        };

        let stream = futures::stream::unfold(cursor, |cursor| async move {
            let item = cursor.next_delivery().await?;
            Some((Ok::<_, BrokerError>(item), cursor))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let state = self.shared.state.lock();
        for queue in state.queues.values() {
            queue.notify.notify_waiters();
        }
        debug!("In-memory broker closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }
}

impl BrokerState {
    /// Route a message through an exchange onto every matching queue.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
        effects: &mut Vec<Enqueued>,
    ) -> Result<usize, BrokerError> {
        let kind = self
            .exchanges
            .get(exchange)
            .map(|e| e.kind)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;

        // A queue bound through several matching patterns gets one copy.
        let targets: BTreeSet<String> = self
            .bindings
            .iter()
            .filter(|(ex, pattern, _)| ex == exchange && routing::matches(kind, pattern, routing_key))
            .map(|(_, _, queue)| queue.clone())
            .collect();

        for queue in &targets {
            self.next_seq += 1;
            let seq = self.next_seq;
            if let Some(queue_state) = self.queues.get_mut(queue) {
                queue_state.ready.push_back(StoredMessage {
                    seq,
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    envelope: envelope.clone(),
                });
                effects.push(Enqueued {
                    queue: queue.clone(),
                    seq,
                    ttl: queue_state.spec.message_ttl,
                    notify: Arc::clone(&queue_state.notify),
                });
            }
        }
        Ok(targets.len())
    }

    /// Route a rejected or expired message through its queue's dead-letter
    /// target. Dropped when the queue has none.
    fn dead_letter(
        &mut self,
        queue: &str,
        message: StoredMessage,
        reason: &str,
        effects: &mut Vec<Enqueued>,
    ) {
        let target = self
            .queues
            .get(queue)
            .and_then(|q| q.spec.dead_letter.clone());
        let Some(target) = target else {
            debug!(queue, reason, message_id = %message.envelope.message_id(), "Message discarded, no dead-letter target");
            return;
        };

        let routing_key = target.routing_key.unwrap_or(message.routing_key);
        let envelope = message
            .envelope
            .with_header(HEADER_DEATH_REASON, reason)
            .with_header(HEADER_DEATH_QUEUE, queue);

        trace!(queue, reason, exchange = %target.exchange, %routing_key, "Dead-lettering message");
        if let Err(e) = self.route(&target.exchange, &routing_key, envelope, effects) {
            warn!(queue, error = %e, "Dead-letter exchange missing, message dropped");
        }
    }
}

impl Shared {
    /// Wake consumers and arm TTL timers for newly enqueued messages.
    fn apply(shared: &Arc<Self>, effects: Vec<Enqueued>) {
        for enqueued in effects {
            enqueued.notify.notify_waiters();
            if let Some(ttl) = enqueued.ttl {
                Self::schedule_expiry(Arc::downgrade(shared), enqueued.queue, enqueued.seq, ttl);
            }
        }
    }

    fn schedule_expiry(shared: Weak<Self>, queue: String, seq: u64, ttl: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(%queue, "No async runtime, message TTL will not be enforced");
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(&queue, seq);
            }
        });
    }

    /// Expire a message if it is still waiting on its queue.
    fn expire(self: &Arc<Self>, queue: &str, seq: u64) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut effects = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return;
            };
            let Some(position) = queue_state.ready.iter().position(|m| m.seq == seq) else {
                return;
            };
            let Some(message) = queue_state.ready.remove(position) else {
                return;
            };
            state.dead_letter(queue, message, "expired", &mut effects);
        }
        Self::apply(self, effects);
    }

    fn take(self: &Arc<Self>, queue: &str, consumer_id: u64, prefetch: usize) -> Take {
        if self.closed.load(Ordering::Acquire) {
            return Take::Closed;
        }
        let mut state = self.state.lock();
        state.next_tag += 1;
        let tag = state.next_tag;

        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Take::Closed;
        };
        let in_flight = queue_state
            .unacked
            .values()
            .filter(|f| f.consumer_id == consumer_id)
            .count();
        if in_flight >= prefetch {
            return Take::Empty;
        }
        let Some(message) = queue_state.ready.pop_front() else {
            return Take::Empty;
        };

        let delivery = Delivery::new(
            tag,
            queue,
            message.exchange.clone(),
            message.routing_key.clone(),
            message.redelivered,
            message.envelope.clone(),
            Box::new(MemoryAcker {
                shared: Arc::clone(self),
                queue: queue.to_string(),
                tag,
            }),
        );
        queue_state
            .unacked
            .insert(tag, InFlight { consumer_id, message });
        Take::Delivery(delivery)
    }

    fn settle(self: &Arc<Self>, queue: &str, tag: u64, settlement: Settlement) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ChannelClosed);
        }
        let mut effects = Vec::new();
        let notify = {
            let mut state = self.state.lock();
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
            let in_flight = queue_state
                .unacked
                .remove(&tag)
                .ok_or(BrokerError::AlreadySettled { tag })?;
            let notify = Arc::clone(&queue_state.notify);

            let mut message = in_flight.message;
            match settlement {
                Settlement::Ack => {}
                Settlement::Requeue => {
                    message.redelivered = true;
                    queue_state.ready.push_front(message);
                }
                Settlement::Reject => state.dead_letter(queue, message, "rejected", &mut effects),
            }
            notify
        };
        // A prefetch slot is free either way.
        notify.notify_waiters();
        Self::apply(self, effects);
        Ok(())
    }

    /// Return a departed consumer's unsettled deliveries to the head of the
    /// queue in their original order.
    fn cancel_consumer(&self, queue: &str, consumer_id: u64) {
        let mut state = self.state.lock();
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return;
        };
        let tags: Vec<u64> = queue_state
            .unacked
            .iter()
            .filter(|(_, f)| f.consumer_id == consumer_id)
            .map(|(tag, _)| *tag)
            .collect();
        if tags.is_empty() {
            return;
        }

        let mut returned: Vec<StoredMessage> = tags
            .into_iter()
            .filter_map(|tag| queue_state.unacked.remove(&tag))
            .map(|f| f.message)
            .collect();
        returned.sort_by_key(|m| m.seq);
        for mut message in returned.into_iter().rev() {
            message.redelivered = true;
            queue_state.ready.push_front(message);
        }
        debug!(queue, consumer_id, "Consumer cancelled, unsettled deliveries requeued");
        queue_state.notify.notify_waiters();
    }
}

struct ConsumerCursor {
    shared: Arc<Shared>,
    queue: String,
    consumer_id: u64,
    prefetch: usize,
    notify: Arc<Notify>,
}

impl ConsumerCursor {
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.take(&self.queue, self.consumer_id, self.prefetch) {
                Take::Delivery(delivery) => return Some(delivery),
                Take::Closed => return None,
                Take::Empty => notified.await,
            }
        }
    }
}

impl Drop for ConsumerCursor {
    fn drop(&mut self) {
        self.shared.cancel_consumer(&self.queue, self.consumer_id);
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.shared.settle(&self.queue, self.tag, Settlement::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let settlement = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Reject
        };
        self.shared.settle(&self.queue, self.tag, settlement)
    }
}
