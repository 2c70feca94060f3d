//! # Shared Cache - Key-Value Store Port
//!
//! The single storage seam used by the lock manager, the idempotency record
//! store and the cache-aside layer.
//!
//! ## Adapters
//!
//! | Adapter | Use |
//! |---------|-----|
//! | `InMemoryStore` | tests and single-process deployments, outage simulation |
//! | `RedisStore` (feature `redis`) | production |
//!
//! Every operation the upper layers rely on for correctness is atomic on the
//! store side: `set_nx` (lock acquire), `compare_and_delete` (lock release)
//! and `incr` (rate counters).

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod memory;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryStore;
pub use store::{get_json, set_json, KeyValueStore};

#[cfg(feature = "redis")]
pub use crate::redis::RedisStore;
