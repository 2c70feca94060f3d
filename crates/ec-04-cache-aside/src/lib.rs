//! # Cache-Aside Layer
//!
//! **Component:** 4
//!
//! ## Purpose
//!
//! Read-through caching for entity and search reads, with delete-on-write
//! invalidation driven either inline by the writer or by product events.
//!
//! ## Read Path
//!
//! ```text
//! get_or_load(key, ttl, loader)
//!     │
//!     ├─ GET key ── hit ────────────────→ value (loader not called)
//!     ├─ GET key ── miss ──→ loader() ──→ SET key value EX ttl ──→ value
//!     └─ GET key ── store error ──→ loader() ──→ value (treated as a miss)
//! ```
//!
//! ## Write Path
//!
//! ```text
//! write() ── ok ──→ DEL product:<id> ──→ DEL product_search:* ──→ result
//!         └─ err ─→ result (cache untouched)
//! ```
//!
//! Entries are deleted, never rewritten: a search result keyed by a hash of
//! its parameters cannot be recomputed for every cached parameter set.
//!
//! ## Keys
//!
//! | Key | Source | Default TTL |
//! |-----|--------|-------------|
//! | `product:<id>` | [`entity_key`] | 5 min |
//! | `product_search:<sha256>` | [`query_key`] over normalized parameters | 10 min |
//! | `ratelimit:fixed:<id>:<window>` | [`FixedWindowLimiter`] | one window |
//! | `ratelimit:sliding:<id>:<window>` | [`SlidingWindowLimiter`] | two windows |
//!
//! ## Also Here
//!
//! - [`ProductCacheInvalidator`]: listener handler that invalidates on
//!   product events published by other services.
//! - [`KeysetQuery`]: cursor pagination for the listings being cached.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod service;

pub use domain::{
    entity_key, hours, minutes, namespace_prefix, normalize_params, query_key, seconds,
    Comparison, Cursor, CursorError, KeysetPage, KeysetQuery, PageDirection, SortDirection,
    DEFAULT_ENTITY_TTL, DEFAULT_PAGE_LIMIT, DEFAULT_SEARCH_TTL, MAX_PAGE_LIMIT,
    PRODUCT_NAMESPACE, PRODUCT_SEARCH_NAMESPACE,
};
pub use service::{
    CacheAside, CacheStats, FixedWindowLimiter, ProductCacheInvalidator,
    RateLimitDecision, SlidingWindowLimiter,
};
