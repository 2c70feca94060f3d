use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default retry bound.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default time a failed message waits before redelivery.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// TTL of the wait queue.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A failure at this count goes to quarantine instead of another retry.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// The count is past the bound: quarantine without invoking the handler.
    pub fn is_over_limit(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }

    /// Most handler invocations a single message can cause.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
