//! # Connection Manager
//!
//! **Component:** 1 (leaf)
//!
//! ## Purpose
//!
//! Owns the network connections to the message broker and to the cache
//! store. Opens them with bounded retries, hands out the resulting handle to
//! every component that needs one, and closes them once in-flight work has
//! drained after a termination signal.
//!
//! Handles are passed explicitly into constructors. There is no
//! process-wide connection singleton.
//!
//! ## Lifecycle
//!
//! ```text
//! [DISCONNECTED] ──connect()──→ attempt 1 ──fail──→ sleep(delay(1)) ──→ attempt 2 ... attempt N
//!                                   │                                        │
//!                                   └── ok ──→ [CONNECTED] ←── ok ───────────┘
//!                                                   │               (all failed: ConnectionError::Exhausted)
//!                                                close()
//!                                                   ↓
//!                                            [DISCONNECTED]
//! ```
//!
//! | Operation | Method | Effect |
//! |-----------|--------|--------|
//! | Connect | `ConnectionManager::connect()` | Retry with `ReconnectPolicy`, fatal after N attempts |
//! | Use | `ConnectionManager::handle()` | Clone of the open handle |
//! | Reconnect | `ConnectionManager::reconnect()` | Drop the old handle, connect again |
//! | Close | `ConnectionManager::close()` | Close and forget the handle; idempotent |
//!
//! ## Shutdown
//!
//! `ShutdownCoordinator` broadcasts the termination signal to every
//! supervised task, waits a bounded grace period for them to finish, and
//! only then lets the caller close connections. Tasks are never aborted
//! mid-handler.
//!
//! ## Module Structure
//!
//! ```text
//! domain/   - ReconnectPolicy, ConnectionError
//! ports/    - Connector trait
//! adapters/ - in-memory, AMQP (feature `amqp`) and Redis (feature `redis`) connectors
//! service/  - ConnectionManager, ShutdownCoordinator
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{MemoryBrokerConnector, MemoryStoreConnector};
#[cfg(feature = "amqp")]
pub use adapters::AmqpConnector;
#[cfg(feature = "redis")]
pub use adapters::RedisConnector;
pub use domain::{BackoffStrategy, ConnectionError, ReconnectPolicy};
pub use ports::Connector;
pub use service::{ConnectionManager, DrainReport, ShutdownCoordinator, ShutdownTrigger};
