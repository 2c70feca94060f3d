use async_trait::async_trait;
use event_telemetry::metrics::{MESSAGES_QUARANTINED, RETRIES_SCHEDULED};
use shared_bus::{
    decode, Broker, Delivery, DeliveryProcessor, EventSchema, HandlerError, MessageHandler,
    Outcome, PublishOptions,
};
use shared_types::HEADER_MAX_RETRIES;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::{decide, QuarantineReason, RetryDecision, RetryPolicy, RetryTopology, ROUTE_FAILED};

/// Delivery processor that applies the retry state machine around a handler.
pub struct RetryingProcessor<E, H> {
    broker: Arc<dyn Broker>,
    dead_letter_exchange: String,
    policy: RetryPolicy,
    handler: H,
    _schema: PhantomData<fn(E)>,
}

impl<E, H> RetryingProcessor<E, H> {
    pub fn new(broker: Arc<dyn Broker>, topology: &RetryTopology, handler: H) -> Self {
        Self {
            broker,
            dead_letter_exchange: topology.dead_letter_exchange(),
            policy: *topology.policy(),
            handler,
            _schema: PhantomData,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<E, H> RetryingProcessor<E, H>
where
    E: EventSchema,
    H: MessageHandler<E>,
{
    fn quarantine(&self, delivery: &Delivery, reason: QuarantineReason, cause: &str) -> Outcome {
        MESSAGES_QUARANTINED
            .with_label_values(&[delivery.queue.as_str(), reason.label()])
            .inc();
        error!(
            queue = %delivery.queue,
            message_id = %delivery.envelope.message_id(),
            retry_count = delivery.envelope.retry_count(),
            reason = reason.label(),
            cause,
            "Message quarantined"
        );
        Outcome::Nack { requeue: false }
    }

    /// Re-publish a copy with the next retry count into the wait queue.
    async fn schedule(&self, delivery: &Delivery, original_routing_key: &str, next_retry: u32) -> Outcome {
        let copy = delivery
            .envelope
            .with_retry_count(next_retry, original_routing_key)
            .with_header(HEADER_MAX_RETRIES, self.policy.max_retries.to_string());

        match self
            .broker
            .publish(
                &self.dead_letter_exchange,
                ROUTE_FAILED,
                copy,
                PublishOptions::confirmed(),
            )
            .await
        {
            Ok(()) => {
                RETRIES_SCHEDULED
                    .with_label_values(&[delivery.queue.as_str()])
                    .inc();
                warn!(
                    queue = %delivery.queue,
                    message_id = %delivery.envelope.message_id(),
                    retry_count = next_retry,
                    max_retries = self.policy.max_retries,
                    delay_ms = self.policy.delay.as_millis() as u64,
                    "Retry scheduled"
                );
                Outcome::Ack
            }
            Err(e) => {
                // Nothing was scheduled; hand the original back to the queue.
                error!(
                    queue = %delivery.queue,
                    message_id = %delivery.envelope.message_id(),
                    error = %e,
                    "Could not schedule retry, requeueing"
                );
                Outcome::Nack { requeue: true }
            }
        }
    }
}

#[async_trait]
impl<E, H> DeliveryProcessor for RetryingProcessor<E, H>
where
    E: EventSchema,
    H: MessageHandler<E>,
{
    async fn process(&self, delivery: &Delivery) -> Outcome {
        let record = delivery.envelope.retry_record();
        let retry_count = record.retry_count;

        if self.policy.is_over_limit(retry_count) {
            return self.quarantine(delivery, QuarantineReason::Exhausted, "retry count past limit");
        }

        let mut message = match decode::<E>(delivery) {
            Ok(message) => message,
            Err(e) => return self.quarantine(delivery, QuarantineReason::Permanent, &e.to_string()),
        };
        // Messages coming back from the retry queue arrive under the
        // dead-letter routing key.
        let original_routing_key = record
            .original_routing_key
            .unwrap_or_else(|| delivery.routing_key.clone());
        message.routing_key = original_routing_key.clone();

        let result = self.handler.handle(&message).await;
        let decision = decide(retry_count, &self.policy, &result);
        debug!(
            queue = %delivery.queue,
            message_id = %delivery.envelope.message_id(),
            retry_count,
            decision = ?decision,
            "Handler finished"
        );

        match decision {
            RetryDecision::Schedule { next_retry } => {
                self.schedule(delivery, &original_routing_key, next_retry).await
            }
            RetryDecision::Quarantine(reason) => {
                let cause = match &result {
                    Err(e) => e.to_string(),
                    Ok(_) => String::new(),
                };
                self.quarantine(delivery, reason, &cause)
            }
            RetryDecision::Requeue => {
                if let Err(HandlerError::Contention(cause)) = &result {
                    debug!(queue = %delivery.queue, cause = %cause, "Contention, requeueing");
                }
                decision.outcome()
            }
            RetryDecision::Ack => decision.outcome(),
        }
    }
}
