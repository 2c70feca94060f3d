//! # Eventual Success After Transient Failure
//!
//! Transient failures within the retry budget end in an acknowledged message
//! with no copy left in any retry or poison queue.

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

    fn assert_drained(hx: &Harness) {
        let [main, retry] = hx.topology.listen_queues();
        for queue in [main, retry, hx.topology.wait_queue(), hx.topology.poison_queue()] {
            assert_eq!(hx.depth(&queue), 0, "{queue} not empty");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success() {
        let hx = harness().await;
        hx.publisher()
            .publish(&payment_created("pay-1"), PublishContext::with_key("pay-1"))
            .await
            .unwrap();

        let handler = CountingHandler::failing_first(2);
        let probe = Arc::clone(&handler);
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, move || probe.calls() == 3)
            .await;

        assert_eq!(*handler.attempts.lock(), vec![0, 1, 2]);
        assert_drained(&hx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_allowed_attempt() {
        let hx = harness().await;
        hx.publisher()
            .publish(&payment_created("pay-2"), PublishContext::with_key("pay-2"))
            .await
            .unwrap();

        let handler = CountingHandler::failing_first(3);
        let probe = Arc::clone(&handler);
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, move || probe.calls() == 4)
            .await;

        assert_drained(&hx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_leave_no_idempotency_record() {
        let hx = harness().await;
        hx.publisher()
            .publish(&payment_created("pay-3"), PublishContext::with_key("pay-3"))
            .await
            .unwrap();

        let manager = Arc::new(IdempotencyManager::new(
            Arc::new(InMemoryStore::new()),
            IdempotencyConfig::default(),
        ));
        let handler = CountingHandler::failing_first(2);
        let processor =
            hx.processor(IdempotentHandler::new(Arc::clone(&manager), Arc::clone(&handler)));
        let probe = Arc::clone(&handler);
        hx.run_until(processor, 1, move || probe.calls() == 3).await;

        // Only the successful third attempt was recorded.
        let record = manager.records().get("pay-3").await.unwrap().unwrap();
        assert_eq!(record.result, serde_json::json!({"call": 3}));
        assert_drained(&hx);
    }
}
