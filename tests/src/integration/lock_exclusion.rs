//! # Lock Mutual Exclusion
//!
//! Concurrent first-time deliveries of one key: exactly one worker runs the
//! handler, the others replay or requeue.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use ec_02_retry_pipeline::RetryPolicy;
    use ec_03_idempotency::{
        IdempotencyConfig, IdempotencyManager, IdempotentHandler, LockConfig, LockManager,
    };
    use futures::future::join_all;
    use shared_bus::PublishContext;
    use shared_cache::{InMemoryStore, KeyValueStore};

    use crate::fixtures::{payment_created, CountingHandler, Harness};

    fn shared_store() -> Arc<dyn KeyValueStore> {
        Arc::new(InMemoryStore::new())
    }

    // =========================================================================
    // THROUGH THE BROKER
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_ten_concurrent_deliveries_run_handler_once() {
        let hx = Harness::new(
            "payments",
            "payment-service",
            "payment.#",
            RetryPolicy::new(3, Duration::from_secs(30)),
        )
        .await;
        let publisher = hx.publisher();
        for _ in 0..10 {
            publisher
                .publish(&payment_created("pay-1"), PublishContext::with_key("pay-1"))
                .await
                .unwrap();
        }

        let manager = Arc::new(IdempotencyManager::new(
            shared_store(),
            IdempotencyConfig::default(),
        ));
        let handler = CountingHandler::slow(Duration::from_millis(300));
        let processor = hx.processor(IdempotentHandler::new(manager, Arc::clone(&handler)));
        let [main, _] = hx.topology.listen_queues();

        hx.run_until(processor, 10, || {
            hx.depth(&main) == 0 && hx.broker.unacked_count(&main) == Some(0)
        })
        .await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(hx.depth(&hx.topology.poison_queue()), 0);
    }

    // =========================================================================
    // DIRECT
    // =========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_execute_has_one_fresh_result() {
        let manager = Arc::new(IdempotencyManager::new(
            shared_store(),
            IdempotencyConfig::default(),
        ));
        let runs = Arc::new(AtomicUsize::new(0));

        let attempts = (0..10).map(|_| {
            let manager = Arc::clone(&manager);
            let runs = Arc::clone(&runs);
            tokio::spawn(async move {
                manager
                    .execute("order-7", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(serde_json::json!({"order": 7}))
                    })
                    .await
            })
        });
        let results = join_all(attempts).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let fresh = results
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|result| matches!(result, Ok(execution) if !execution.is_replay()))
            .count();
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn test_only_one_of_many_try_acquire_wins() {
        let locks = Arc::new(LockManager::new(shared_store(), LockConfig::default()));
        let tokens = join_all((0..16).map(|_| {
            let locks = Arc::clone(&locks);
            async move { locks.try_acquire("inventory:p-1").await.unwrap() }
        }))
        .await;

        let winners: Vec<_> = tokens.into_iter().flatten().collect();
        assert_eq!(winners.len(), 1);

        let token = winners.into_iter().next().unwrap();
        assert!(locks.release(token).await.unwrap());
        assert!(locks.try_acquire("inventory:p-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_with_lock_serializes_critical_sections() {
        let locks = Arc::new(LockManager::new(shared_store(), LockConfig::default()));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers = (0..4).map(|_| {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            tokio::spawn(async move {
                locks
                    .with_lock("stock:p-9", || async move {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            })
        });
        let results = join_all(workers).await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(results.into_iter().all(|joined| joined.unwrap().is_ok()));
    }
}
