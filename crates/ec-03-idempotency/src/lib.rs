//! # Idempotency & Lock Manager
//!
//! **Component:** 3
//!
//! ## Purpose
//!
//! Makes processing effectively-once on top of at-least-once delivery. Sits
//! in front of a handler, deduplicates by idempotency key, serializes first
//! attempts through a distributed lock, and replays the stored result for
//! every later attempt.
//!
//! ## Algorithm
//!
//! ```text
//! key missing ─────────────────────────────────────────→ Permanent (reject)
//! record(key) present ─────────────────────────────────→ replay cached result
//! acquire lock:idempotency:<key> (bounded retries) ─ no ─→ Contention (requeue)
//!     │ yes
//!     ├─ record(key) present (raced) ─→ release ───────→ replay cached result
//!     └─ run handler ─→ on success store record ─→ release (always) ─→ result
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Side effect runs at most once per key while the record lives | record check before and inside the lock |
//! | Only the holder releases a lock | `compare_and_delete` on the random token |
//! | A crashed holder never deadlocks a key | lock TTL |
//! | Lock is released whether the handler succeeds, fails or panics | `catch_unwind` around the handler |
//! | Records are written once and never updated | written only after success, read-only afterwards |
//!
//! ## Store Keys
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `idempotent:<key>` | `{"status":"completed","result":..,"processed_at":..}` | 24h |
//! | `lock:<resource>` | random token | 30s |
//!
//! ## Failure Mapping
//!
//! | Condition | `HandlerError` |
//! |-----------|----------------|
//! | Missing key | `Permanent` |
//! | Lock not acquired within budget | `Contention` |
//! | Store unreachable while locking | `Transient` |
//! | Handler error | unchanged |
//! | Handler panic | `Transient` |

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod service;

pub use domain::{
    lock_key, record_key, IdempotencyConfig, IdempotencyError, IdempotencyRecord, LockConfig,
    RecordStatus,
};
pub use service::{Execution, IdempotencyManager, IdempotentHandler, LockManager, LockToken, RecordStore};
