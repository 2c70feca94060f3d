//! Cross-crate delivery guarantees.

pub mod cache_aside;
pub mod eventual_success;
pub mod idempotent_replay;
pub mod lock_exclusion;
pub mod retry_bound;
pub mod routing;
pub mod service_flow;
pub mod topology;
