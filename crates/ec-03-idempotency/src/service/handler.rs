use async_trait::async_trait;
use shared_bus::{EventSchema, HandlerError, HandlerResult, Message, MessageHandler};
use std::sync::Arc;

use super::manager::IdempotencyManager;
use crate::domain::IdempotencyError;

/// Wraps a handler so each idempotency key is processed at most once.
///
/// Duplicates return the recorded result and are acknowledged like fresh
/// successes. Messages without a key are rejected as permanent failures.
pub struct IdempotentHandler<H> {
    manager: Arc<IdempotencyManager>,
    inner: H,
}

impl<H> IdempotentHandler<H> {
    pub fn new(manager: Arc<IdempotencyManager>, inner: H) -> Self {
        Self { manager, inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<E, H> MessageHandler<E> for IdempotentHandler<H>
where
    E: EventSchema,
    H: MessageHandler<E>,
{
    async fn handle(&self, message: &Message<E>) -> HandlerResult {
        let key = message
            .idempotency_key()
            .ok_or_else(|| HandlerError::from(IdempotencyError::MissingKey))?;

        self.manager
            .execute(key, || self.inner.handle(message))
            .await
            .map(|execution| execution.into_result())
            .map_err(HandlerError::from)
    }
}
