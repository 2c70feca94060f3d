//! # Idempotent Replay
//!
//! Deliveries sharing an idempotency key produce the side effect once; later
//! deliveries get the recorded result back without running the handler.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ec_02_retry_pipeline::RetryPolicy;
    use ec_03_idempotency::{IdempotencyConfig, IdempotencyManager, IdempotentHandler};
    use shared_bus::PublishContext;
    use shared_cache::InMemoryStore;

    use crate::fixtures::{payment_created, CountingHandler, Harness};

    async fn harness() -> Harness {
        Harness::new(
            "payments",
            "payment-service",
            "payment.#",
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .await
    }

    fn manager(store: &InMemoryStore) -> Arc<IdempotencyManager> {
        Arc::new(IdempotencyManager::new(
            Arc::new(store.clone()),
            IdempotencyConfig::default(),
        ))
    }

    // =========================================================================
    // TWO DELIVERIES, ONE EFFECT
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_same_key_published_twice_runs_once() {
        let hx = harness().await;
        let publisher = hx.publisher();
        let event = payment_created("pay-1");
        for _ in 0..2 {
            publisher
                .publish(&event, PublishContext::with_key("pay-1"))
                .await
                .unwrap();
        }

        let store = InMemoryStore::new();
        let handler = CountingHandler::slow(Duration::from_millis(50));
        let processor = hx.processor(IdempotentHandler::new(manager(&store), Arc::clone(&handler)));
        let [main, _] = hx.topology.listen_queues();

        // Prefetch 2: both copies are in flight at the same time.
        hx.run_until(processor, 2, || {
            hx.depth(&main) == 0 && hx.broker.unacked_count(&main) == Some(0)
        })
        .await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(hx.depth(&hx.topology.poison_queue()), 0);
        assert_eq!(hx.depth(&hx.topology.wait_queue()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_after_success_returns_recorded_result() {
        let store = InMemoryStore::new();
        let manager = manager(&store);
        let handler = CountingHandler::succeeding();

        for _ in 0..3 {
            let hx = harness().await;
            hx.publisher()
                .publish(&payment_created("pay-2"), PublishContext::with_key("pay-2"))
                .await
                .unwrap();
            let processor =
                hx.processor(IdempotentHandler::new(Arc::clone(&manager), Arc::clone(&handler)));
            let [main, _] = hx.topology.listen_queues();
            hx.run_until(processor, 1, || {
                hx.depth(&main) == 0 && hx.broker.unacked_count(&main) == Some(0)
            })
            .await;
        }

        assert_eq!(handler.calls(), 1);
        let record = manager.records().get("pay-2").await.unwrap().unwrap();
        assert_eq!(record.result, serde_json::json!({"call": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_each_run() {
        let hx = harness().await;
        let publisher = hx.publisher();
        for key in ["pay-a", "pay-b", "pay-c"] {
            publisher
                .publish(&payment_created(key), PublishContext::with_key(key))
                .await
                .unwrap();
        }

        let handler = CountingHandler::succeeding();
        let processor = hx.processor(IdempotentHandler::new(
            manager(&InMemoryStore::new()),
            Arc::clone(&handler),
        ));
        let probe = Arc::clone(&handler);
        hx.run_until(processor, 3, move || probe.calls() == 3).await;

        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_without_key_is_quarantined_unprocessed() {
        let hx = harness().await;
        // Publishing through the broker directly skips the key header.
        let envelope = shared_types::MessageEnvelope::new(
            serde_json::to_vec(&payment_created("pay-3")).unwrap(),
        );
        shared_bus::Broker::publish(
            &hx.broker,
            "payment-service",
            "payment.created",
            envelope,
            shared_bus::PublishOptions::default(),
        )
        .await
        .unwrap();

        let handler = CountingHandler::succeeding();
        let processor = hx.processor(IdempotentHandler::new(
            manager(&InMemoryStore::new()),
            Arc::clone(&handler),
        ));
        let poison = hx.topology.poison_queue();
        hx.run_until(processor, 1, || hx.depth(&poison) == 1).await;

        assert_eq!(handler.calls(), 0);
    }
}
