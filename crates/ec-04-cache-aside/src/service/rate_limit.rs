//! # Window Counters
//!
//! Store-backed rate limiting for request paths in front of the cache.
//!
//! Two algorithms over `INCR` counters:
//! - **Fixed window**: one counter per `floor(now / window)`, created with
//!   a TTL of one window. Cheap, but allows a burst of `2 * limit` across a
//!   window boundary.
//! - **Sliding window**: the previous window's count weighted by how much of
//!   it still overlaps the trailing window, plus the current count.
//!
//! Counters live in the shared store, so every process sees the same
//! counts. A store failure is returned to the caller, which decides
//! whether to fail open.

use shared_cache::KeyValueStore;
use shared_types::{now_millis, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one counted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Unix seconds at which the current window ends.
    pub reset_at: u64,
    /// Seconds to wait before retrying, when rejected.
    pub retry_after: Option<u64>,
}

/// Fixed-window counter keyed `ratelimit:fixed:<id>:<window>`.
pub struct FixedWindowLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: u64,
    window_secs: u64,
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `limit` requests per `window`.
    ///
    /// Windows shorter than a second count as one second.
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window_secs: window.as_secs().max(1),
        }
    }

    /// Count a request for `id` now.
    pub async fn check(&self, id: &str) -> Result<RateLimitDecision, StoreError> {
        self.check_at(id, now_millis() / 1_000).await
    }

    /// Count a request for `id` at `now` (Unix seconds).
    pub async fn check_at(&self, id: &str, now: u64) -> Result<RateLimitDecision, StoreError> {
        let window = now / self.window_secs;
        let key = format!("ratelimit:fixed:{id}:{window}");
        let ttl = Duration::from_secs(self.window_secs);

        let count = u64::try_from(self.store.incr(&key, Some(ttl)).await?).unwrap_or(0);
        let allowed = count <= self.limit;
        let reset_at = (window + 1) * self.window_secs;

        if !allowed {
            debug!(id, count, limit = self.limit, "Rate limited");
        }
        Ok(RateLimitDecision {
            allowed,
            remaining: self.limit.saturating_sub(count),
            reset_at,
            retry_after: (!allowed).then(|| reset_at.saturating_sub(now)),
        })
    }
}

/// Sliding-window counter keyed `ratelimit:sliding:<id>:<window>`.
pub struct SlidingWindowLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: u64,
    window_secs: u64,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window_secs: window.as_secs().max(1),
        }
    }

    pub async fn check(&self, id: &str) -> Result<RateLimitDecision, StoreError> {
        self.check_at(id, now_millis() / 1_000).await
    }

    /// Rejected requests are counted, as in the fixed window.
    ///
    /// The current window is incremented before anything is decided, so
    /// concurrent callers each see a distinct count. The previous window is
    /// closed and only read.
    pub async fn check_at(&self, id: &str, now: u64) -> Result<RateLimitDecision, StoreError> {
        let window = now / self.window_secs;
        let current_key = format!("ratelimit:sliding:{id}:{window}");

        // Kept for two windows so it can serve as the previous window.
        let current = u64::try_from(
            self.store
                .incr(&current_key, Some(Duration::from_secs(self.window_secs * 2)))
                .await?,
        )
        .unwrap_or(0);
        let previous = if window == 0 {
            0
        } else {
            let previous_key = format!("ratelimit:sliding:{id}:{}", window - 1);
            self.read_count(&previous_key).await?
        };

        let elapsed = now % self.window_secs;
        // previous * (1 - elapsed / window), in integer arithmetic
        let weighted_previous = previous * (self.window_secs - elapsed) / self.window_secs;
        let estimated = weighted_previous + current;
        let allowed = estimated <= self.limit;
        let reset_at = (window + 1) * self.window_secs;

        if !allowed {
            debug!(id, estimated, limit = self.limit, "Rate limited");
        }
        Ok(RateLimitDecision {
            allowed,
            remaining: self.limit.saturating_sub(estimated),
            reset_at,
            retry_after: (!allowed).then(|| self.window_secs - elapsed),
        })
    }

    async fn read_count(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}
