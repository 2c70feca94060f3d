//! The retry state machine as a pure function.

use shared_bus::{HandlerError, Outcome};

use super::policy::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    /// Failed at the retry bound.
    Exhausted,
    /// Can never succeed (malformed, missing key, rule violation).
    Permanent,
}

impl QuarantineReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Ack,
    /// Another worker holds the resource; put the message back as is.
    Requeue,
    /// Re-publish a copy carrying `next_retry` to the wait queue.
    Schedule { next_retry: u32 },
    /// Reject without requeue; the broker dead-letters it to the poison queue.
    Quarantine(QuarantineReason),
}

impl RetryDecision {
    /// Settlement for decisions that need no re-publish. `Schedule` settles
    /// as `Ack` once the copy is published.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Ack | Self::Schedule { .. } => Outcome::Ack,
            Self::Requeue => Outcome::Nack { requeue: true },
            Self::Quarantine(_) => Outcome::Nack { requeue: false },
        }
    }
}

/// Decide what happens to a message that was processed at `retry_count`.
pub fn decide<T>(
    retry_count: u32,
    policy: &RetryPolicy,
    result: &Result<T, HandlerError>,
) -> RetryDecision {
    match result {
        Ok(_) => RetryDecision::Ack,
        Err(HandlerError::Contention(_)) => RetryDecision::Requeue,
        Err(HandlerError::Permanent(_)) => RetryDecision::Quarantine(QuarantineReason::Permanent),
        Err(HandlerError::Transient(_)) if policy.is_exhausted(retry_count) => {
            RetryDecision::Quarantine(QuarantineReason::Exhausted)
        }
        Err(HandlerError::Transient(_)) => RetryDecision::Schedule {
            next_retry: retry_count + 1,
        },
    }
}
