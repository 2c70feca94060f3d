//! # Commerce Events Test Suite
//!
//! Cross-crate scenarios for the delivery guarantees, all against the
//! in-memory broker and store.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Shared handlers, events, listener harness
//! ├── integration/       # One module per delivery guarantee
//! │   ├── idempotent_replay.rs
//! │   ├── retry_bound.rs
//! │   ├── eventual_success.rs
//! │   ├── lock_exclusion.rs
//! │   ├── cache_aside.rs
//! │   ├── routing.rs
//! │   ├── topology.rs
//! │   └── service_flow.rs
//! └── benches/           # Criterion benchmarks (cargo bench)
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ec-tests
//! cargo test -p ec-tests integration::retry_bound::
//! cargo bench -p ec-tests
//! ```

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod integration;
