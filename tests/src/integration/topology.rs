//! # Topology Idempotence
//!
//! Re-declaring identical exchanges, queues and retry layouts is a no-op;
//! conflicting re-declarations are refused.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ec_02_retry_pipeline::{RetryPolicy, RetryTopology};
    use shared_bus::{Broker, InMemoryBroker, PublishOptions, TopologyRegistrar};
    use shared_types::{Binding, BrokerError, ExchangeKind, ExchangeSpec, MessageEnvelope};

    fn registrar() -> (InMemoryBroker, TopologyRegistrar) {
        let broker = InMemoryBroker::new();
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        (broker, registrar)
    }

    #[tokio::test]
    async fn test_declaring_twice_does_not_duplicate_bindings() {
        let (broker, registrar) = registrar();
        let bindings = [Binding::new("cart-service", "cart.#")];

        for _ in 0..2 {
            registrar
                .declare_exchange("cart-service", ExchangeKind::Topic, true)
                .await
                .unwrap();
            registrar
                .declare_queue("carts", true, &bindings)
                .await
                .unwrap();
        }

        assert_eq!(broker.exchange_count(), 1);
        assert_eq!(broker.queue_count(), 1);
        assert_eq!(broker.binding_count(), 1);
        assert_eq!(registrar.queue("carts").unwrap().bindings.len(), 1);

        // A single publish still lands once.
        broker
            .publish(
                "cart-service",
                "cart.created",
                MessageEnvelope::new(Vec::new()),
                PublishOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("carts"), Some(1));
    }

    #[tokio::test]
    async fn test_conflicting_exchange_kind_is_refused() {
        let (_, registrar) = registrar();
        registrar
            .declare_exchange("orders", ExchangeKind::Topic, true)
            .await
            .unwrap();
        let conflict = registrar
            .declare_exchange("orders", ExchangeKind::Direct, true)
            .await;
        assert!(matches!(conflict, Err(BrokerError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn test_retry_topology_redeclare_is_stable() {
        let (broker, registrar) = registrar();
        let topology = RetryTopology::new(
            "order-service.cart-events",
            ExchangeSpec::topic("cart-service"),
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .bind("cart.#");

        topology.declare(&registrar).await.unwrap();
        let snapshot = (
            broker.exchange_count(),
            broker.queue_count(),
            broker.binding_count(),
        );
        topology.declare(&registrar).await.unwrap();

        assert_eq!(
            snapshot,
            (
                broker.exchange_count(),
                broker.queue_count(),
                broker.binding_count()
            )
        );
        // Main exchange plus the dead-letter exchange; four queues.
        assert_eq!(snapshot.0, 2);
        assert_eq!(snapshot.1, 4);
    }

    #[tokio::test]
    async fn test_changed_retry_delay_is_refused() {
        let (_, registrar) = registrar();
        let exchange = ExchangeSpec::topic("cart-service");
        RetryTopology::new("carts", exchange.clone(), RetryPolicy::new(3, Duration::from_secs(30)))
            .bind("cart.#")
            .declare(&registrar)
            .await
            .unwrap();

        let changed =
            RetryTopology::new("carts", exchange, RetryPolicy::new(3, Duration::from_secs(5)))
                .bind("cart.#")
                .declare(&registrar)
                .await;
        assert!(matches!(changed, Err(BrokerError::PreconditionFailed { .. })));
    }
}
