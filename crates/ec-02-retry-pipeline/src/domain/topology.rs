//! Queue layout for one retried queue.

use shared_bus::{Topology, TopologyRegistrar};
use shared_types::{BrokerError, ExchangeSpec, QueueSpec};

use super::policy::RetryPolicy;

/// Dead-letter routing key into the wait queue.
pub const ROUTE_FAILED: &str = "failed";
/// Dead-letter routing key from the wait queue into the retry queue.
pub const ROUTE_RETRY: &str = "retry";
/// Dead-letter routing key into the poison queue.
pub const ROUTE_POISON: &str = "poison";

/// Main queue plus its wait, retry and poison queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTopology {
    queue: String,
    exchange: ExchangeSpec,
    patterns: Vec<String>,
    policy: RetryPolicy,
    durable: bool,
}

impl RetryTopology {
    pub fn new(queue: impl Into<String>, exchange: ExchangeSpec, policy: RetryPolicy) -> Self {
        let durable = exchange.durable;
        Self {
            queue: queue.into(),
            exchange,
            patterns: Vec::new(),
            policy,
            durable,
        }
    }

    /// Bind the main queue to the main exchange with `pattern`.
    #[must_use]
    pub fn bind(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.queue)
    }

    pub fn wait_queue(&self) -> String {
        format!("{}.wait", self.queue)
    }

    pub fn retry_queue(&self) -> String {
        format!("{}.retry", self.queue)
    }

    pub fn poison_queue(&self) -> String {
        format!("{}.poison", self.queue)
    }

    /// Queues the listener consumes: the main queue and the retry queue.
    pub fn listen_queues(&self) -> [String; 2] {
        [self.queue.clone(), self.retry_queue()]
    }

    pub fn topology(&self) -> Topology {
        let dlx_name = self.dead_letter_exchange();
        let mut dlx = ExchangeSpec::direct(dlx_name.clone());
        dlx.durable = self.durable;

        let durability = |spec: QueueSpec| if self.durable { spec } else { spec.transient() };

        let mut main = QueueSpec::new(self.queue.clone()).dead_letter_to(dlx_name.clone(), Some(ROUTE_POISON));
        for pattern in &self.patterns {
            main = main.bind(self.exchange.name.clone(), pattern.clone());
        }

        let wait = QueueSpec::new(self.wait_queue())
            .bind(dlx_name.clone(), ROUTE_FAILED)
            .dead_letter_to(dlx_name.clone(), Some(ROUTE_RETRY))
            .message_ttl(self.policy.delay);

        let retry = QueueSpec::new(self.retry_queue())
            .bind(dlx_name.clone(), ROUTE_RETRY)
            .dead_letter_to(dlx_name.clone(), Some(ROUTE_POISON));

        let poison = QueueSpec::new(self.poison_queue()).bind(dlx_name, ROUTE_POISON);

        Topology::new()
            .exchange(self.exchange.clone())
            .exchange(dlx)
            .queue(durability(poison))
            .queue(durability(wait))
            .queue(durability(retry))
            .queue(durability(main))
    }

    /// Declare everything through the registrar. Safe to call repeatedly.
    pub async fn declare(&self, registrar: &TopologyRegistrar) -> Result<(), BrokerError> {
        registrar.declare(&self.topology()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::InMemoryBroker;
    use std::sync::Arc;
    use std::time::Duration;

    fn cart_topology() -> RetryTopology {
        RetryTopology::new(
            "order.cart-events",
            ExchangeSpec::topic("cart"),
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .bind("cart.*")
        .bind("cart.*")
    }

    #[test]
    fn test_queue_names() {
        let topology = cart_topology();
        assert_eq!(topology.dead_letter_exchange(), "order.cart-events.dlx");
        assert_eq!(
            topology.listen_queues(),
            ["order.cart-events".to_string(), "order.cart-events.retry".to_string()]
        );
    }

    #[test]
    fn test_layout() {
        let topology = cart_topology().topology();
        let find = |name: &str| topology.queues.iter().find(|q| q.name == name).unwrap();

        let main = find("order.cart-events");
        assert_eq!(main.bindings.len(), 1);
        assert_eq!(
            main.dead_letter.as_ref().unwrap().routing_key.as_deref(),
            Some(ROUTE_POISON)
        );

        let wait = find("order.cart-events.wait");
        assert_eq!(wait.message_ttl, Some(Duration::from_secs(30)));
        assert_eq!(
            wait.dead_letter.as_ref().unwrap().routing_key.as_deref(),
            Some(ROUTE_RETRY)
        );

        let retry = find("order.cart-events.retry");
        assert_eq!(retry.bindings[0].exchange, "order.cart-events.dlx");
        assert!(retry.message_ttl.is_none());
    }

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let broker = InMemoryBroker::new();
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        let topology = cart_topology();

        topology.declare(&registrar).await.unwrap();
        topology.declare(&registrar).await.unwrap();

        assert_eq!(broker.exchange_count(), 2);
        assert_eq!(broker.queue_count(), 4);
        assert_eq!(broker.binding_count(), 4);
    }
}
