//! # Topology Registrar
//!
//! Declares exchanges, queues and bindings idempotently and remembers what it
//! declared, so repeated startup declarations cost no broker round-trips and
//! conflicting re-declarations fail fast.
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Identical re-declaration is a no-op | registry comparison before the broker call |
//! | Bindings reference declared exchanges | checked against the registry |
//! | Bindings are never duplicated | registry and broker both use set semantics |

use parking_lot::Mutex;
use shared_types::{Binding, BrokerError, ExchangeKind, ExchangeSpec, QueueSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::broker::Broker;

/// A batch of declarations. Exchanges are declared before queues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
}

impl Topology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exchange(mut self, exchange: ExchangeSpec) -> Self {
        if !self.exchanges.contains(&exchange) {
            self.exchanges.push(exchange);
        }
        self
    }

    #[must_use]
    pub fn queue(mut self, queue: QueueSpec) -> Self {
        self.queues.push(queue);
        self
    }

    /// Append another topology's declarations.
    #[must_use]
    pub fn merge(mut self, other: Topology) -> Self {
        for exchange in other.exchanges {
            self = self.exchange(exchange);
        }
        self.queues.extend(other.queues);
        self
    }
}

#[derive(Default)]
struct Registry {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueSpec>,
}

/// Idempotent declaration front-end over a broker.
pub struct TopologyRegistrar {
    broker: Arc<dyn Broker>,
    registry: Mutex<Registry>,
}

impl TopologyRegistrar {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// The broker declarations go to.
    #[must_use]
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// `declareExchange(name, kind, durable)`.
    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut spec = ExchangeSpec::new(name, kind);
        spec.durable = durable;
        self.declare_exchange_spec(&spec).await
    }

    pub async fn declare_exchange_spec(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        if let Some(existing) = self.registry.lock().exchanges.get(&spec.name) {
            if existing == spec {
                return Ok(());
            }
            return Err(BrokerError::PreconditionFailed {
                name: spec.name.clone(),
                reason: format!(
                    "already declared as {} (durable={})",
                    existing.kind, existing.durable
                ),
            });
        }

        self.broker.declare_exchange(spec).await?;
        self.registry
            .lock()
            .exchanges
            .insert(spec.name.clone(), spec.clone());
        info!(exchange = %spec.name, kind = %spec.kind, durable = spec.durable, "Exchange declared");
        Ok(())
    }

    /// `declareQueue(name, durable, bindings)`.
    pub async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        bindings: &[Binding],
    ) -> Result<(), BrokerError> {
        let mut spec = QueueSpec::new(name);
        spec.durable = durable;
        for binding in bindings {
            spec = spec.bind(binding.exchange.clone(), binding.pattern.clone());
        }
        self.declare_queue_spec(&spec).await
    }

    pub async fn declare_queue_spec(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let merged = {
            let registry = self.registry.lock();
            if let Some(missing) = spec
                .referenced_exchanges()
                .find(|name| !registry.exchanges.contains_key(*name))
            {
                return Err(BrokerError::ExchangeNotFound(missing.to_string()));
            }

            match registry.queues.get(&spec.name) {
                Some(existing) if !existing.same_arguments(spec) => {
                    return Err(BrokerError::PreconditionFailed {
                        name: spec.name.clone(),
                        reason: "already declared with different arguments".to_string(),
                    });
                }
                Some(existing) => {
                    let new_bindings: Vec<&Binding> = spec
                        .bindings
                        .iter()
                        .filter(|b| !existing.bindings.contains(b))
                        .collect();
                    if new_bindings.is_empty() {
                        return Ok(());
                    }
                    let mut merged = existing.clone();
                    for binding in new_bindings {
                        merged = merged.bind(binding.exchange.clone(), binding.pattern.clone());
                    }
                    merged
                }
                None => spec.clone(),
            }
        };

        self.broker.declare_queue(&merged).await?;
        debug!(
            queue = %merged.name,
            bindings = merged.bindings.len(),
            "Queue declared"
        );
        self.registry
            .lock()
            .queues
            .insert(merged.name.clone(), merged);
        Ok(())
    }

    /// Declare a whole topology, exchanges first.
    pub async fn declare(&self, topology: &Topology) -> Result<(), BrokerError> {
        for exchange in &topology.exchanges {
            self.declare_exchange_spec(exchange).await?;
        }
        for queue in &topology.queues {
            self.declare_queue_spec(queue).await?;
        }
        Ok(())
    }

    /// A previously declared exchange.
    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.registry.lock().exchanges.get(name).cloned()
    }

    /// A previously declared queue with every binding added so far.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.registry.lock().queues.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    fn registrar() -> (InMemoryBroker, TopologyRegistrar) {
        let broker = InMemoryBroker::new();
        let registrar = TopologyRegistrar::new(Arc::new(broker.clone()));
        (broker, registrar)
    }

    #[tokio::test]
    async fn test_declare_twice_does_not_error_or_duplicate() {
        let (broker, registrar) = registrar();
        let bindings = [Binding::new("payments", "payment.#")];

        for _ in 0..2 {
            registrar
                .declare_exchange("payments", ExchangeKind::Topic, true)
                .await
                .unwrap();
            registrar
                .declare_queue("ledger", true, &bindings)
                .await
                .unwrap();
        }

        assert_eq!(broker.exchange_count(), 1);
        assert_eq!(broker.queue_count(), 1);
        assert_eq!(broker.binding_count(), 1);
        assert_eq!(registrar.queue("ledger").unwrap().bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_queue_binding_needs_declared_exchange() {
        let (_broker, registrar) = registrar();
        let err = registrar
            .declare_queue("ledger", true, &[Binding::new("payments", "#")])
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::ExchangeNotFound("payments".to_string()));
    }

    #[tokio::test]
    async fn test_conflicting_exchange_redeclaration() {
        let (_broker, registrar) = registrar();
        registrar
            .declare_exchange("cart", ExchangeKind::Topic, true)
            .await
            .unwrap();
        let err = registrar
            .declare_exchange("cart", ExchangeKind::Direct, true)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn test_new_binding_is_added_to_existing_queue() {
        let (broker, registrar) = registrar();
        registrar
            .declare_exchange("cart", ExchangeKind::Topic, true)
            .await
            .unwrap();
        registrar
            .declare_queue("orders", true, &[Binding::new("cart", "cart.created")])
            .await
            .unwrap();
        registrar
            .declare_queue("orders", true, &[Binding::new("cart", "cart.updated")])
            .await
            .unwrap();

        assert_eq!(broker.binding_count(), 2);
        assert_eq!(registrar.queue("orders").unwrap().bindings.len(), 2);
    }

    #[tokio::test]
    async fn test_declare_topology_batch() {
        let (broker, registrar) = registrar();
        let topology = Topology::new()
            .exchange(ExchangeSpec::topic("product"))
            .exchange(ExchangeSpec::topic("product"))
            .queue(QueueSpec::new("cart.products").bind("product", "product.*"));

        registrar.declare(&topology).await.unwrap();
        registrar.declare(&topology).await.unwrap();

        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(broker.queue_count(), 1);
        assert!(registrar.exchange("product").unwrap().durable);
    }
}
