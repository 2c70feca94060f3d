use std::time::Duration;

/// Processing lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Lock expiry, the backstop for crashed holders.
    pub ttl: Duration,
    /// Acquisition attempts before reporting contention.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `base_delay * 2^n` plus jitter.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub max_jitter: Duration,
    /// Budget for a single `SET NX` round trip.
    pub attempt_timeout: Duration,
    /// Budget for the whole acquisition including delays.
    pub total_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(1),
            total_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a completed record is replayed.
    pub record_ttl: Duration,
    pub lock: LockConfig,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(24 * 60 * 60),
            lock: LockConfig::default(),
        }
    }
}
