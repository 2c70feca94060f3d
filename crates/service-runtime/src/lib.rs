//! # Service Runtime Library
//!
//! Wiring for one commerce service process. The `main.rs` binary is a thin
//! shell around [`ServiceRuntime`]; everything here is public so the
//! integration tests can run a whole process against in-memory backends.
//!
//! ## Queues
//!
//! | Queue                        | Bound to                  | Handler                                 |
//! |------------------------------|---------------------------|-----------------------------------------|
//! | `<service>.cart-events`      | `cart-service` / `cart.#` | idempotent [`CartProjection`]           |
//! | `<service>.product-cache`    | `product-service` / `product.#` | product cache invalidation        |
//!
//! Both are retried queues: each gets `.dlx`, `.wait`, `.retry` and
//! `.poison` siblings.
//!
//! ## Environment
//!
//! | Variable                  | Default          |
//! |---------------------------|------------------|
//! | `EC_SERVICE_NAME`         | `order-service`  |
//! | `EC_BROKER_URL`           | `memory://`      |
//! | `EC_CACHE_URL`            | `memory://`      |
//! | `EC_PREFETCH`             | `1`              |
//! | `EC_PUBLISH_CONFIRMS`     | `false`          |
//! | `EC_MAX_RETRIES`          | `3`              |
//! | `EC_RETRY_DELAY_MS`       | `30000`          |
//! | `EC_LOCK_TTL_SECS`        | `30`             |
//! | `EC_IDEMPOTENCY_TTL_SECS` | `86400`          |
//! | `EC_CONNECT_ATTEMPTS`     | `5`              |
//! | `EC_CONNECT_DELAY_MS`     | `1000`           |
//! | `EC_SHUTDOWN_GRACE_SECS`  | `10`             |
//! | `EC_LOG_LEVEL`            | `info`           |
//! | `EC_JSON_LOGS`            | `false`          |

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backends;
pub mod config;
pub mod projection;
pub mod runtime;

pub use backends::{BrokerConnection, StoreConnection};
pub use config::{BrokerBackend, CacheBackend, ConfigError, RuntimeConfig};
pub use projection::CartProjection;
pub use runtime::{RuntimeError, ServiceRuntime, CART_EXCHANGE, PRODUCT_EXCHANGE};
