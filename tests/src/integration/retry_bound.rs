//! # Retry Bound
//!
//! A handler that never succeeds sees `max_retries + 1` deliveries, then the
//! message sits in the poison queue and is never delivered again.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ec_02_retry_pipeline::RetryPolicy;
    use shared_bus::{HandlerError, PublishContext};
    use shared_types::{HEADER_DEATH_REASON, HEADER_RETRY_COUNT};

    use crate::fixtures::{payment_created, CountingHandler, Harness};

    async fn harness(max_retries: u32) -> Harness {
        Harness::new(
            "payments",
            "payment-service",
            "payment.#",
            RetryPolicy::new(max_retries, Duration::from_secs(30)),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_retries_mean_four_invocations() {
        let hx = harness(3).await;
        hx.publisher()
            .publish(&payment_created("pay-1"), PublishContext::with_key("pay-1"))
            .await
            .unwrap();

        let handler = CountingHandler::always_failing();
        let poison = hx.topology.poison_queue();
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, || hx.depth(&poison) == 1)
            .await;

        assert_eq!(handler.calls(), 4);
        assert_eq!(*handler.attempts.lock(), vec![0, 1, 2, 3]);

        let quarantined = hx.broker.peek(&poison);
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].header(HEADER_RETRY_COUNT), Some("3"));
        assert_eq!(quarantined[0].header(HEADER_DEATH_REASON), Some("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quarantined_message_stays_silent() {
        let hx = harness(3).await;
        hx.publisher()
            .publish(&payment_created("pay-2"), PublishContext::with_key("pay-2"))
            .await
            .unwrap();

        let handler = CountingHandler::always_failing();
        let poison = hx.topology.poison_queue();
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, || hx.depth(&poison) == 1)
            .await;

        // Listen again for several retry delays: nothing reaches the handler.
        let before = handler.calls();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(300);
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, || {
            tokio::time::Instant::now() >= deadline
        })
        .await;

        assert_eq!(handler.calls(), before);
        assert_eq!(hx.depth(&poison), 1);
        assert_eq!(hx.depth(&hx.topology.wait_queue()), 0);
        assert_eq!(hx.depth(&hx.topology.retry_queue()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_quarantines_on_first_failure() {
        let hx = harness(0).await;
        hx.publisher()
            .publish(&payment_created("pay-3"), PublishContext::with_key("pay-3"))
            .await
            .unwrap();

        let handler = CountingHandler::always_failing();
        let poison = hx.topology.poison_queue();
        hx.run_until(hx.processor(Arc::clone(&handler)), 1, || hx.depth(&poison) == 1)
            .await;

        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let hx = harness(3).await;
        hx.publisher()
            .publish(&payment_created("pay-4"), PublishContext::with_key("pay-4"))
            .await
            .unwrap();

        struct Rejecting;

        #[async_trait::async_trait]
        impl shared_bus::MessageHandler<shared_bus::CommerceEvent> for Rejecting {
            async fn handle(
                &self,
                _message: &shared_bus::Message<shared_bus::CommerceEvent>,
            ) -> shared_bus::HandlerResult {
                Err(HandlerError::permanent("card declined"))
            }
        }

        let poison = hx.topology.poison_queue();
        hx.run_until(hx.processor(Rejecting), 1, || hx.depth(&poison) == 1)
            .await;

        assert_eq!(hx.depth(&hx.topology.wait_queue()), 0);
        assert_eq!(
            hx.broker.peek(&poison)[0].header(HEADER_DEATH_REASON),
            Some("rejected")
        );
    }
}
