//! # Retry Pipeline (Dead-Letter Exchange)
//!
//! **Component:** 2
//!
//! ## Purpose
//!
//! Bounded retries with a broker-side delay and permanent quarantine of
//! messages that cannot be processed. The broker is the timer: backoff is a
//! queue TTL plus dead-lettering, with no schedulers in application code.
//!
//! ## Topology (per consuming queue `Q`)
//!
//! ```text
//!                 main exchange
//!                       │ bindings
//!                       ▼
//!  ┌──────────────────────────────┐  nack(requeue=false)   ┌─────────────┐
//!  │ Q            (DLX → poison)  │ ─────────────────────→ │  Q.poison   │
//!  └──────────────────────────────┘                        └─────────────┘
//!        │ transient failure:                                     ▲
//!        │ re-publish copy with x-retry-count+1 to Q.dlx/"failed" │
//!        ▼                                                        │
//!  ┌──────────────────────────────┐                               │
//!  │ Q.wait  (TTL, DLX → "retry") │                               │
//!  └──────────────────────────────┘                               │
//!        │ TTL expiry                                             │
//!        ▼                                                        │
//!  ┌──────────────────────────────┐  nack(requeue=false)          │
//!  │ Q.retry      (DLX → poison)  │ ──────────────────────────────┘
//!  └──────────────────────────────┘
//!        │ consumed by the same listener as Q
//! ```
//!
//! All four queues hang off a per-queue direct exchange `Q.dlx`, so retries
//! of one queue never reach another queue bound to the same main exchange.
//!
//! ## State Machine
//!
//! | Retry count | Handler result | Decision |
//! |-------------|----------------|----------|
//! | any | `Ok` | Ack |
//! | any | `Contention` | Nack, requeue |
//! | any | `Permanent` / undecodable | Quarantine |
//! | `< max` | `Transient` | Re-publish with count + 1 to the wait queue, ack original |
//! | `== max` | `Transient` | Quarantine |
//! | `> max` | (not invoked) | Quarantine |
//!
//! With `max_retries = 3` an always-failing handler is invoked exactly four
//! times.
//!
//! The envelope on the broker is never mutated: a retry is a new publish of
//! a copy with an incremented `x-retry-count`.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod domain;
pub mod service;

pub use domain::{
    decide, QuarantineReason, RetryDecision, RetryPolicy, RetryTopology, ROUTE_FAILED,
    ROUTE_POISON, ROUTE_RETRY,
};
pub use service::RetryingProcessor;
