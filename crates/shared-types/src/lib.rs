//! # Shared Types Crate
//!
//! This crate contains the broker topology entities, the `MessageEnvelope`
//! every published event travels in, and the error taxonomy shared by the
//! broker and cache-store ports.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-component types are defined here.
//! - **Immutable Envelopes**: A `MessageEnvelope` is never mutated after
//!   construction. The retry pipeline derives a new envelope with an
//!   incremented `x-retry-count` when it re-publishes.
//! - **Headers Carry Metadata**: Idempotency key and retry record live in the
//!   headers table so they survive dead-lettering by the broker.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod entities;
pub mod envelope;
pub mod errors;

pub use entities::*;
pub use envelope::*;
pub use errors::*;
