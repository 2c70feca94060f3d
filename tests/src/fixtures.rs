//! Shared test fixtures.

use async_trait::async_trait;
use ec_02_retry_pipeline::{RetryPolicy, RetryTopology, RetryingProcessor};
use parking_lot::Mutex;
use shared_bus::{
    CommerceEvent, DeliveryProcessor, HandlerError, HandlerResult, InMemoryBroker, Listener,
    Message, MessageHandler, Publisher, TopologyRegistrar,
};
use shared_types::ExchangeSpec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// =============================================================================
// EVENTS
// =============================================================================

pub fn payment_created(payment_id: &str) -> CommerceEvent {
    CommerceEvent::PaymentCreated {
        payment_id: payment_id.to_string(),
        order_id: "o-1".to_string(),
        amount_cents: 4_999,
        currency: "USD".to_string(),
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Counts invocations and fails according to a script.
///
/// Failures are popped from the front of the script; once it is empty every
/// call succeeds. With `always_failing` every call fails transiently.
pub struct CountingHandler {
    calls: AtomicUsize,
    script: Mutex<Vec<HandlerError>>,
    always_fail: bool,
    delay: Duration,
    /// Retry count seen by each invocation.
    pub attempts: Mutex<Vec<u32>>,
}

impl CountingHandler {
    pub fn succeeding() -> Arc<Self> {
        Self::build(Vec::new(), false, Duration::ZERO)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::build(Vec::new(), true, Duration::ZERO)
    }

    pub fn failing_first(failures: usize) -> Arc<Self> {
        let script = (0..failures)
            .map(|n| HandlerError::transient(format!("dependency down ({n})")))
            .collect();
        Self::build(script, false, Duration::ZERO)
    }

    /// Succeeds after sleeping, to widen race windows.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(Vec::new(), false, delay)
    }

    fn build(script: Vec<HandlerError>, always_fail: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script),
            always_fail,
            delay,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler<CommerceEvent> for CountingHandler {
    async fn handle(&self, message: &Message<CommerceEvent>) -> HandlerResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempts.lock().push(message.retry_count());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.always_fail {
            return Err(HandlerError::transient("always failing"));
        }
        let scripted = {
            let mut script = self.script.lock();
            (!script.is_empty()).then(|| script.remove(0))
        };
        match scripted {
            Some(e) => Err(e),
            None => Ok(serde_json::json!({"call": call})),
        }
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// One retried queue on a fresh in-memory broker.
pub struct Harness {
    pub broker: InMemoryBroker,
    pub registrar: TopologyRegistrar,
    pub topology: RetryTopology,
}

impl Harness {
    pub async fn new(queue: &str, exchange: &str, pattern: &str, policy: RetryPolicy) -> Self {
        let broker = InMemoryBroker::new();
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        let topology =
            RetryTopology::new(queue, ExchangeSpec::topic(exchange), policy).bind(pattern);
        topology
            .declare(&registrar)
            .await
            .expect("declaring retry topology");
        Self {
            broker,
            registrar,
            topology,
        }
    }

    pub fn publisher(&self) -> Publisher<CommerceEvent> {
        Publisher::new(Arc::new(self.broker.clone()), self.topology.exchange().clone())
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.broker.queue_depth(queue).unwrap_or(0)
    }

    /// Wrap `handler` in the retry pipeline.
    pub fn processor<H>(&self, handler: H) -> Arc<RetryingProcessor<CommerceEvent, H>>
    where
        H: MessageHandler<CommerceEvent>,
    {
        Arc::new(RetryingProcessor::new(
            Arc::new(self.broker.clone()),
            &self.topology,
            handler,
        ))
    }

    /// Listen with `processor` until `done` holds, polling every 100ms of
    /// (usually paused) time, then shut the listener down.
    pub async fn run_until<P, F>(&self, processor: Arc<P>, prefetch: u16, done: F)
    where
        P: DeliveryProcessor + 'static,
        F: Fn() -> bool,
    {
        let [main, retry] = self.topology.listen_queues();
        let listener = Listener::new(Arc::new(self.broker.clone()), main)
            .with_queue(retry)
            .with_config(shared_bus::ListenerConfig {
                prefetch,
                consumer_tag: "ec-tests".to_string(),
            });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(async move { listener.listen(processor, rx).await });

        for _ in 0..5_000 {
            if done() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tx.send(true).expect("listener still running");
        task.await
            .expect("listener task panicked")
            .expect("listener failed");
    }
}
