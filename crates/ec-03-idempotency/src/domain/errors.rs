use shared_bus::HandlerError;
use shared_types::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IdempotencyError {
    #[error("missing idempotency key")]
    MissingKey,

    /// Another worker holds the lock.
    #[error("resource {resource} is locked by another worker")]
    Contention { resource: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Handler(HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<IdempotencyError> for HandlerError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::MissingKey => HandlerError::permanent(err),
            IdempotencyError::Contention { .. } => HandlerError::contention(err),
            IdempotencyError::Handler(inner) => inner,
            IdempotencyError::Store(_) | IdempotencyError::Panicked(_) => {
                HandlerError::transient(err)
            }
        }
    }
}
