//! # Topology Entities
//!
//! Exchanges, queues and bindings as declared against the broker.
//!
//! | Entity | Identity | Mutability |
//! |--------|----------|------------|
//! | `ExchangeSpec` | name | created once, never mutated |
//! | `QueueSpec` | name | arguments fixed, bindings additive |
//! | `Binding` | (exchange, pattern) | set semantics, never duplicated |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::BrokerError;

/// Exchange kind, which determines how routing keys fan out to queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Dot-delimited pattern match with `*` and `#` wildcards.
    Topic,
    /// Routing key ignored; every bound queue receives the message.
    Fanout,
}

impl ExchangeKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            "fanout" => Ok(Self::Fanout),
            other => Err(BrokerError::Protocol(format!(
                "unknown exchange kind: {other}"
            ))),
        }
    }
}

/// Declared exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    /// Durable exchanges survive a broker restart. Messages published to a
    /// durable exchange are marked persistent.
    pub durable: bool,
}

impl ExchangeSpec {
    /// Durable exchange of the given kind.
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Direct)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Topic)
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Fanout)
    }

    /// Mark the exchange as non-durable.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }
}

/// A queue binding: `(exchange, routingKeyPattern)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub pattern: String,
}

impl Binding {
    pub fn new(exchange: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            pattern: pattern.into(),
        }
    }
}

/// Where a queue sends messages that are rejected without requeue or that
/// expire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadLetterTarget {
    pub exchange: String,
    /// Routing key to dead-letter with. `None` keeps the message's own key.
    pub routing_key: Option<String>,
}

/// Declared queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub bindings: Vec<Binding>,
    /// `x-dead-letter-exchange` / `x-dead-letter-routing-key`.
    pub dead_letter: Option<DeadLetterTarget>,
    /// `x-message-ttl`.
    pub message_ttl: Option<Duration>,
}

impl QueueSpec {
    /// Durable queue with no bindings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            bindings: Vec::new(),
            dead_letter: None,
            message_ttl: None,
        }
    }

    /// Add a binding. Duplicate bindings are ignored.
    #[must_use]
    pub fn bind(mut self, exchange: impl Into<String>, pattern: impl Into<String>) -> Self {
        let binding = Binding::new(exchange, pattern);
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
        self
    }

    #[must_use]
    pub fn dead_letter_to(
        mut self,
        exchange: impl Into<String>,
        routing_key: Option<&str>,
    ) -> Self {
        self.dead_letter = Some(DeadLetterTarget {
            exchange: exchange.into(),
            routing_key: routing_key.map(str::to_string),
        });
        self
    }

    #[must_use]
    pub fn message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Whether two declarations of the same queue agree on every argument
    /// the broker fixes at creation time. Bindings are not compared.
    #[must_use]
    pub fn same_arguments(&self, other: &QueueSpec) -> bool {
        self.name == other.name
            && self.durable == other.durable
            && self.dead_letter == other.dead_letter
            && self.message_ttl == other.message_ttl
    }

    /// Exchanges this queue's bindings reference.
    pub fn referenced_exchanges(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.exchange.as_str())
    }
}
