//! # Shared Bus - Broker Abstraction for the Event Core
//!
//! Everything a service needs to talk to the message broker: the broker
//! port, topology declaration, routing rules, and the typed publisher and
//! listener.
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────────┐  publish(exchange, key)  ┌──────────────┐
//! │  Publisher<E>│ ───────────────────────► │   Exchange   │
//! └──────────────┘                          └──────┬───────┘
//!                                                  │ bindings (direct/topic/fanout)
//!                                                  ▼
//! ┌──────────────┐   Delivery ──► Outcome   ┌──────────────┐
//! │   Listener   │ ◄─────────────────────── │    Queue     │
//! └──────────────┘   Ack | Nack{requeue}    └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **At-least-once**: unsettled deliveries return to the queue when their
//!   consumer goes away.
//! - **Idempotent topology**: re-declaring identical exchanges and queues is
//!   a no-op; bindings are never duplicated.
//! - **Explicit settlement**: processors return an `Outcome`; nothing acks
//!   from inside a callback.
//!
//! ## Adapters
//!
//! - `InMemoryBroker`: single-process broker with DLX and TTL semantics.
//! - `AmqpBroker` (feature `amqp`): RabbitMQ and other AMQP 0-9-1 brokers.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod events;
pub mod listener;
pub mod memory;
pub mod publisher;
pub mod routing;
pub mod topology;

#[cfg(feature = "amqp")]
pub mod amqp;

// Re-export main types
pub use broker::{
    Acker, Broker, ConsumeOptions, Delivery, DeliveryStream, Outcome, PublishOptions,
};
pub use events::{CartLine, CartSnapshot, CommerceEvent, EventSchema, ProductSnapshot};
pub use listener::{
    decode, outcome_for, DeliveryProcessor, HandlerError, HandlerResult, Listener,
    ListenerConfig, ListenerStats, Message, MessageHandler, TypedProcessor,
};
pub use memory::InMemoryBroker;
pub use publisher::{PublishContext, PublishMode, Publisher};
pub use topology::{Topology, TopologyRegistrar};

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;

/// Default consumer prefetch: one unsettled message at a time.
pub const DEFAULT_PREFETCH: u16 = 1;
