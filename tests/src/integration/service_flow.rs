//! # Service Flow
//!
//! A whole service process on in-memory backends: configuration, topology,
//! listeners, and a clean shutdown.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ec_01_connection::ReconnectPolicy;
    use service_runtime::{
        BrokerConnection, RuntimeConfig, ServiceRuntime, StoreConnection, CART_EXCHANGE,
    };
    use shared_bus::{CartLine, CartSnapshot, CommerceEvent, InMemoryBroker, PublishContext};
    use shared_cache::InMemoryStore;

    fn cart(version: u64, quantity: u32) -> CartSnapshot {
        CartSnapshot {
            cart_id: "c-1".to_string(),
            user_id: "u-1".to_string(),
            line: CartLine {
                product_id: "p-1".to_string(),
                title: "Lamp".to_string(),
                price_cents: 2_000,
                seller_id: "s-1".to_string(),
                quantity,
            },
            total_cents: 2_000 * u64::from(quantity),
            version,
        }
    }

    async fn start(broker: &InMemoryBroker) -> ServiceRuntime {
        let config = RuntimeConfig::from_lookup(|var| match var {
            "EC_SERVICE_NAME" => Some("order-service".to_string()),
            "EC_PREFETCH" => Some("4".to_string()),
            _ => None,
        })
        .unwrap();
        config.validate().unwrap();

        let runtime = ServiceRuntime::with_connections(
            config,
            BrokerConnection::memory(broker.clone(), ReconnectPolicy::default()),
            StoreConnection::memory(InMemoryStore::new(), ReconnectPolicy::default()),
        )
        .await
        .unwrap();
        runtime.declare_topology().await.unwrap();
        runtime.start();
        runtime
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..1_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_update_is_applied_after_retry() {
        let broker = InMemoryBroker::new();
        let runtime = start(&broker).await;
        let publisher = runtime.publisher(CART_EXCHANGE);

        publisher
            .publish(
                &CommerceEvent::CartUpdated(cart(1, 3)),
                PublishContext::with_key("cart-c-1-v1"),
            )
            .await
            .unwrap();
        publisher
            .publish(
                &CommerceEvent::CartCreated(cart(0, 1)),
                PublishContext::with_key("cart-c-1-v0"),
            )
            .await
            .unwrap();

        let projection = Arc::clone(runtime.projection());
        wait_for(|| projection.get("c-1").map(|c| c.version) == Some(1)).await;

        let report = runtime.stop().await;
        assert!(report.is_clean());
        assert_eq!(projection.get("c-1").unwrap().line.quantity, 3);
        let poison = runtime.cart_topology().poison_queue();
        assert_eq!(broker.queue_depth(&poison), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_delete_is_replayed() {
        let broker = InMemoryBroker::new();
        let runtime = start(&broker).await;
        let publisher = runtime.publisher(CART_EXCHANGE);

        publisher
            .publish(
                &CommerceEvent::CartCreated(cart(0, 1)),
                PublishContext::with_key("cart-c-1-v0"),
            )
            .await
            .unwrap();
        let projection = Arc::clone(runtime.projection());
        wait_for(|| projection.get("c-1").is_some()).await;

        let delete = CommerceEvent::CartDeleted {
            cart_id: "c-1".to_string(),
            user_id: "u-1".to_string(),
            version: 1,
        };
        for _ in 0..2 {
            publisher
                .publish(&delete, PublishContext::with_key("cart-c-1-delete"))
                .await
                .unwrap();
        }
        wait_for(|| projection.is_empty()).await;
        let main = runtime.cart_topology().queue().to_string();
        wait_for(|| {
            broker.queue_depth(&main) == Some(0) && broker.unacked_count(&main) == Some(0)
        })
        .await;

        let record = runtime
            .idempotency()
            .records()
            .get("cart-c-1-delete")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.result["applied"], true);
        assert!(runtime.stop().await.is_clean());
    }
}
