//! Cache TTL helpers.

use std::time::Duration;

/// Single-entity reads (`product:<id>`).
pub const DEFAULT_ENTITY_TTL: Duration = seconds(300);

/// Search results live longer; writes invalidate them anyway.
pub const DEFAULT_SEARCH_TTL: Duration = minutes(10);

pub const fn seconds(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

pub const fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3_600))
}
