//! # Error Types
//!
//! Errors shared by the broker port and the key-value store port.

use thiserror::Error;

/// Errors raised by a message broker implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The channel or connection has been closed.
    #[error("Channel closed")]
    ChannelClosed,

    /// Operation referenced an exchange that was never declared.
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    /// Operation referenced a queue that was never declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// Re-declaration with arguments that differ from the existing entity.
    #[error("Declaration conflict for {name}: {reason}")]
    PreconditionFailed { name: String, reason: String },

    /// Publish was rejected or could not be confirmed.
    #[error("Publish to {exchange} failed: {reason}")]
    PublishFailed { exchange: String, reason: String },

    /// Consumer could not be registered or the delivery stream broke.
    #[error("Consume from {queue} failed: {reason}")]
    ConsumeFailed { queue: String, reason: String },

    /// Ack/nack for a delivery the broker no longer tracks.
    #[error("Delivery {tag} already settled")]
    AlreadySettled { tag: u64 },

    /// Event could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other protocol-level failure.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether the failure concerns the connection itself, so that
    /// reconnecting may help.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ChannelClosed
        )
    }
}

/// Errors raised by a key-value store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The store is reachable but refusing commands.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A command failed (wrong type, script error).
    #[error("Store command failed: {0}")]
    Command(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A call exceeded its time budget.
    #[error("Store operation timed out after {millis}ms")]
    Timeout { millis: u64 },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
