//! # Routing Correctness
//!
//! Topic bindings deliver exactly the messages whose routing keys match.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use shared_bus::routing::topic_matches;
    use shared_bus::{
        Broker, CommerceEvent, EventSchema, InMemoryBroker, PublishContext, PublishOptions,
        Publisher, TopologyRegistrar,
    };
    use shared_types::{Binding, ExchangeKind, ExchangeSpec, MessageEnvelope};

    use crate::fixtures::payment_created;

    async fn payments_queue() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        registrar
            .declare_exchange("payment-service", ExchangeKind::Topic, true)
            .await
            .unwrap();
        registrar
            .declare_queue(
                "payments",
                true,
                &[Binding::new("payment-service", "payment.#")],
            )
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_hash_pattern_matches_one_or_more_words() {
        let broker = payments_queue().await;
        for key in ["payment.created", "payment.error.retry", "order.created"] {
            broker
                .publish(
                    "payment-service",
                    key,
                    MessageEnvelope::new(key.as_bytes().to_vec()),
                    PublishOptions::default(),
                )
                .await
                .unwrap();
        }

        let arrived: Vec<Vec<u8>> = broker
            .peek("payments")
            .iter()
            .map(|envelope| envelope.payload().to_vec())
            .collect();
        assert_eq!(
            arrived,
            vec![b"payment.created".to_vec(), b"payment.error.retry".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_publisher_uses_event_routing_key() {
        let broker = payments_queue().await;
        let publisher =
            Publisher::<CommerceEvent>::new(Arc::new(broker.clone()), ExchangeSpec::topic("payment-service"));

        let failed = CommerceEvent::PaymentFailed {
            payment_id: "pay-1".to_string(),
            order_id: "o-1".to_string(),
            reason: "insufficient funds".to_string(),
        };
        publisher
            .publish(&payment_created("pay-1"), PublishContext::generated())
            .await
            .unwrap();
        publisher
            .publish(&failed, PublishContext::generated())
            .await
            .unwrap();
        publisher
            .publish(
                &CommerceEvent::OrderCreated {
                    order_id: "o-1".to_string(),
                    user_id: "u-1".to_string(),
                    cart_ids: vec!["c-1".to_string()],
                    total_cents: 4_999,
                },
                PublishContext::generated(),
            )
            .await
            .unwrap();

        assert_eq!(failed.routing_key(), "payment.error.failed");
        assert_eq!(broker.queue_depth("payments"), Some(2));
    }

    #[tokio::test]
    async fn test_unbound_routing_key_is_dropped() {
        let broker = payments_queue().await;
        broker
            .publish(
                "payment-service",
                "seller.created",
                MessageEnvelope::new(Vec::new()),
                PublishOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("payments"), Some(0));
    }

    proptest! {
        #[test]
        fn test_payment_hash_binding_matches_every_payment_key(
            words in prop::collection::vec("[a-z]{1,8}", 1..5)
        ) {
            let key = format!("payment.{}", words.join("."));
            prop_assert!(topic_matches("payment.#", &key));
            let other = format!("order.{}", words.join("."));
            prop_assert!(!topic_matches("payment.#", &other));
        }
    }
}
