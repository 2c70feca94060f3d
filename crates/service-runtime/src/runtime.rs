//! Process wiring.
//!
//! ```text
//! connect ──► declare_topology ──► start ──► run_until_shutdown
//!   │               │                │               │
//!   │ broker+cache  │ exchanges,     │ one supervised│ signal, drain,
//!   │ with backoff  │ retry queues   │ listener/queue│ close connections
//! ```
//!
//! A listener whose delivery stream fails or ends before shutdown is
//! restarted: the broker connection is reopened under the reconnect policy,
//! the topology is declared again and a fresh listener consumes from the
//! new handle. When the policy is exhausted the process shuts down.

use ec_01_connection::{ConnectionError, DrainReport, ShutdownCoordinator, ShutdownTrigger};
use ec_02_retry_pipeline::{RetryTopology, RetryingProcessor};
use ec_03_idempotency::{IdempotencyManager, IdempotentHandler};
use ec_04_cache_aside::{CacheAside, ProductCacheInvalidator};
use event_telemetry::metrics::LISTENER_RESTARTS;
use parking_lot::RwLock;
use shared_bus::{
    Broker, CommerceEvent, DeliveryProcessor, Listener, ListenerConfig, PublishMode, Publisher,
    TopologyRegistrar,
};
use shared_cache::KeyValueStore;
use shared_types::{BrokerError, ExchangeSpec};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backends::{BrokerConnection, StoreConnection};
use crate::config::{ConfigError, RuntimeConfig};
use crate::projection::CartProjection;

/// Topic exchange for cart events.
pub const CART_EXCHANGE: &str = "cart-service";
/// Topic exchange for product events.
pub const PRODUCT_EXCHANGE: &str = "product-service";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("topology: {0}")]
    Broker(#[from] BrokerError),
}

/// Current broker handle, replaced on reconnect.
type BrokerSlot = Arc<RwLock<Arc<dyn Broker>>>;

/// One running service process.
pub struct ServiceRuntime {
    config: RuntimeConfig,
    broker_connection: Arc<BrokerConnection>,
    store_connection: StoreConnection,
    broker: BrokerSlot,
    shutdown: ShutdownCoordinator,
    cart_topology: RetryTopology,
    product_topology: RetryTopology,
    idempotency: Arc<IdempotencyManager>,
    cache: Arc<CacheAside>,
    projection: Arc<CartProjection>,
}

impl ServiceRuntime {
    /// Validate the configuration and open both backends.
    ///
    /// Fails when a backend stays unreachable for the whole reconnect
    /// policy at startup.
    pub async fn connect(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let broker = BrokerConnection::from_backend(config.broker_backend()?, config.connect);
        let store = StoreConnection::from_backend(config.cache_backend()?, config.connect);
        Self::with_connections(config, broker, store).await
    }

    /// Connect through caller-supplied connections.
    pub async fn with_connections(
        config: RuntimeConfig,
        broker_connection: BrokerConnection,
        store_connection: StoreConnection,
    ) -> Result<Self, RuntimeError> {
        let broker = broker_connection.connect().await?;
        let store: Arc<dyn KeyValueStore> = store_connection.connect().await?;

        let cart_topology = RetryTopology::new(
            config.queue_name("cart-events"),
            ExchangeSpec::topic(CART_EXCHANGE),
            config.retry,
        )
        .bind("cart.#");
        let product_topology = RetryTopology::new(
            config.queue_name("product-cache"),
            ExchangeSpec::topic(PRODUCT_EXCHANGE),
            config.retry,
        )
        .bind("product.#");

        info!(
            service = %config.service_name,
            broker = %config.broker_url,
            cache = %config.cache_url,
            "Backends connected"
        );

        Ok(Self {
            shutdown: ShutdownCoordinator::new(config.shutdown_grace),
            idempotency: Arc::new(IdempotencyManager::new(Arc::clone(&store), config.idempotency)),
            cache: Arc::new(CacheAside::new(store)),
            projection: Arc::new(CartProjection::new()),
            config,
            broker_connection: Arc::new(broker_connection),
            store_connection,
            broker: Arc::new(RwLock::new(broker)),
            cart_topology,
            product_topology,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The broker handle currently in use.
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&*self.broker.read())
    }

    pub fn cache(&self) -> &Arc<CacheAside> {
        &self.cache
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyManager> {
        &self.idempotency
    }

    pub fn projection(&self) -> &Arc<CartProjection> {
        &self.projection
    }

    pub fn cart_topology(&self) -> &RetryTopology {
        &self.cart_topology
    }

    pub fn product_topology(&self) -> &RetryTopology {
        &self.product_topology
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Declare exchanges and retry queues. Safe to call on every start.
    pub async fn declare_topology(&self) -> Result<(), RuntimeError> {
        let registrar = TopologyRegistrar::new(self.broker());
        self.cart_topology.declare(&registrar).await?;
        self.product_topology.declare(&registrar).await?;
        info!(
            queues = ?[self.cart_topology.queue(), self.product_topology.queue()],
            "Topology declared"
        );
        Ok(())
    }

    /// Publisher for `exchange`, confirmed if configured so.
    ///
    /// Bound to the current broker handle; build a new one after a
    /// reconnect.
    pub fn publisher(&self, exchange: &str) -> Publisher<CommerceEvent> {
        let mode = if self.config.publish_confirms {
            PublishMode::Confirmed
        } else {
            PublishMode::FireAndForget
        };
        Publisher::new(self.broker(), ExchangeSpec::topic(exchange)).with_mode(mode)
    }

    /// Spawn the supervised listeners under the shutdown coordinator.
    pub fn start(&self) {
        let idempotency = Arc::clone(&self.idempotency);
        let projection = Arc::clone(&self.projection);
        let topology = self.cart_topology.clone();
        self.spawn_supervised(self.cart_topology.clone(), move |broker| {
            RetryingProcessor::<CommerceEvent, _>::new(
                broker,
                &topology,
                IdempotentHandler::new(Arc::clone(&idempotency), Arc::clone(&projection)),
            )
        });

        let cache = Arc::clone(&self.cache);
        let topology = self.product_topology.clone();
        self.spawn_supervised(self.product_topology.clone(), move |broker| {
            RetryingProcessor::<CommerceEvent, _>::new(
                broker,
                &topology,
                ProductCacheInvalidator::new(Arc::clone(&cache)),
            )
        });
    }

    fn spawn_supervised<P, F>(&self, topology: RetryTopology, build: F)
    where
        P: DeliveryProcessor + 'static,
        F: Fn(Arc<dyn Broker>) -> P + Send + Sync + 'static,
    {
        let supervisor = Supervisor {
            topology,
            listener: ListenerConfig {
                prefetch: self.config.prefetch,
                consumer_tag: self.config.service_name.clone(),
            },
            connection: Arc::clone(&self.broker_connection),
            broker: Arc::clone(&self.broker),
            trigger: self.shutdown.trigger_handle(),
        };
        let name = supervisor.topology.queue().to_string();
        let shutdown = self.shutdown.subscribe();
        self.shutdown.spawn(name, supervisor.run(build, shutdown));
    }

    /// Block until a termination signal, then drain and close.
    pub async fn run_until_shutdown(&self) -> DrainReport {
        self.shutdown.wait_for_signal().await;
        self.stop().await
    }

    /// Trigger shutdown, wait for in-flight work, close both connections.
    pub async fn stop(&self) -> DrainReport {
        self.shutdown.trigger();
        let report = self.shutdown.drain().await;
        if let Err(e) = self.broker_connection.close().await {
            warn!(error = %e, "Closing broker connection failed");
        }
        if let Err(e) = self.store_connection.close().await {
            warn!(error = %e, "Closing cache connection failed");
        }
        info!(
            completed = report.completed,
            still_running = report.still_running,
            "Service stopped"
        );
        report
    }
}

/// Keeps one retried queue consumed across broker reconnects.
struct Supervisor {
    topology: RetryTopology,
    listener: ListenerConfig,
    connection: Arc<BrokerConnection>,
    broker: BrokerSlot,
    trigger: ShutdownTrigger,
}

impl Supervisor {
    async fn run<P, F>(self, build: F, mut shutdown: watch::Receiver<bool>)
    where
        P: DeliveryProcessor + 'static,
        F: Fn(Arc<dyn Broker>) -> P,
    {
        let [main, retry] = self.topology.listen_queues();
        loop {
            let generation = self.connection.generation();
            let broker = Arc::clone(&*self.broker.read());
            let listener = Listener::new(Arc::clone(&broker), main.clone())
                .with_queue(retry.clone())
                .with_config(self.listener.clone());

            let outcome = listener.listen(Arc::new(build(broker)), shutdown.clone()).await;
            if *shutdown.borrow() {
                match outcome {
                    Ok(stats) => info!(queue = %main, ?stats, "Listener stopped"),
                    Err(e) => warn!(queue = %main, error = %e, "Listener stopped with error"),
                }
                return;
            }
            match outcome {
                Ok(stats) => warn!(queue = %main, ?stats, "Delivery stream ended unexpectedly"),
                Err(e) => warn!(queue = %main, error = %e, "Listener failed"),
            }

            let reconnected = tokio::select! {
                biased;
                _ = async { let _ = shutdown.wait_for(|flag| *flag).await; } => {
                    info!(queue = %main, "Shutdown during reconnect");
                    return;
                }
                result = self.connection.reconnect_from(generation) => result,
            };
            let broker = match reconnected {
                Ok(broker) => broker,
                Err(e) => {
                    error!(queue = %main, error = %e, "Broker unreachable, shutting down");
                    self.trigger.trigger();
                    return;
                }
            };
            if let Err(e) = self
                .topology
                .declare(&TopologyRegistrar::new(Arc::clone(&broker)))
                .await
            {
                error!(queue = %main, error = %e, "Redeclaring topology failed, shutting down");
                self.trigger.trigger();
                return;
            }

            *self.broker.write() = broker;
            LISTENER_RESTARTS.with_label_values(&[main.as_str()]).inc();
            info!(queue = %main, "Listener restarting on new connection");
        }
    }
}
