pub mod cache;
pub mod invalidation;
pub mod rate_limit;

pub use cache::{CacheAside, CacheStats};
pub use invalidation::ProductCacheInvalidator;
pub use rate_limit::{FixedWindowLimiter, RateLimitDecision, SlidingWindowLimiter};
