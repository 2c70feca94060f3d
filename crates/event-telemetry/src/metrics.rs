//! Prometheus metrics for the event core.
//!
//! All metrics follow the naming convention: `ec_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., messages_published_total)
//! - **Histogram**: Distribution of values (e.g., handler_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISHER / LISTENER
    // =========================================================================

    /// Messages published by exchange
    pub static ref MESSAGES_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("ec_bus_messages_published_total", "Messages published by exchange"),
        &["exchange"]
    ).expect("metric creation failed");

    /// Publish failures by exchange
    pub static ref PUBLISH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("ec_bus_publish_failures_total", "Publish attempts that failed"),
        &["exchange"]
    ).expect("metric creation failed");

    /// Delivery outcomes by queue
    pub static ref DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("ec_bus_deliveries_total", "Settled deliveries by queue and outcome"),
        &["queue", "outcome"]  // outcome: ack/nack/requeue
    ).expect("metric creation failed");

    /// Handler processing time
    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ec_bus_handler_duration_seconds",
            "Time spent processing a delivery"
        ).buckets(exponential_buckets(0.001, 2.0, 15).expect("valid buckets")),
        &["queue"]
    ).expect("metric creation failed");

    // =========================================================================
    // RETRY PIPELINE
    // =========================================================================

    /// Retries scheduled through the wait queue
    pub static ref RETRIES_SCHEDULED: CounterVec = CounterVec::new(
        Opts::new("ec_retry_scheduled_total", "Messages re-published for a delayed retry"),
        &["queue"]
    ).expect("metric creation failed");

    /// Messages sent to the poison queue
    pub static ref MESSAGES_QUARANTINED: CounterVec = CounterVec::new(
        Opts::new("ec_retry_quarantined_total", "Messages routed to permanent quarantine"),
        &["queue", "reason"]  // reason: exhausted/permanent
    ).expect("metric creation failed");

    // =========================================================================
    // IDEMPOTENCY & LOCKS
    // =========================================================================

    /// Deliveries answered from a stored idempotency record
    pub static ref IDEMPOTENT_REPLAYS: Counter = Counter::new(
        "ec_idempotency_replays_total",
        "Deliveries short-circuited to a cached result"
    ).expect("metric creation failed");

    /// Lock acquisition outcomes
    pub static ref LOCK_ACQUISITIONS: CounterVec = CounterVec::new(
        Opts::new("ec_lock_acquisitions_total", "Processing lock acquisition attempts"),
        &["outcome"]  // outcome: acquired/contended/error
    ).expect("metric creation failed");

    // =========================================================================
    // CACHE
    // =========================================================================

    /// Cache lookups by result
    pub static ref CACHE_LOOKUPS: CounterVec = CounterVec::new(
        Opts::new("ec_cache_lookups_total", "Cache-aside lookups"),
        &["result"]  // result: hit/miss/error
    ).expect("metric creation failed");

    /// Keys deleted by invalidation
    pub static ref CACHE_INVALIDATIONS: Counter = Counter::new(
        "ec_cache_invalidated_keys_total",
        "Cache keys deleted on write"
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTIONS
    // =========================================================================

    /// Connection attempts by target and outcome
    pub static ref CONNECTION_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("ec_connection_attempts_total", "Connection attempts"),
        &["target", "outcome"]  // target: broker/cache, outcome: success/failure
    ).expect("metric creation failed");

    /// Listener restarts after a lost delivery stream, by queue
    pub static ref LISTENER_RESTARTS: CounterVec = CounterVec::new(
        Opts::new("ec_listener_restarts_total", "Listener restarts after reconnect"),
        &["queue"]
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
        Box::new(DELIVERIES.clone()),
        Box::new(HANDLER_DURATION.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(MESSAGES_QUARANTINED.clone()),
        Box::new(IDEMPOTENT_REPLAYS.clone()),
        Box::new(LOCK_ACQUISITIONS.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(CACHE_INVALIDATIONS.clone()),
        Box::new(CONNECTION_ATTEMPTS.clone()),
        Box::new(LISTENER_RESTARTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_twice() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_counter_increment() {
        CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
        assert!(CACHE_LOOKUPS.with_label_values(&["hit"]).get() >= 1.0);
    }

    #[test]
    fn test_encode_contains_registered_metric() {
        register_metrics().unwrap();
        MESSAGES_PUBLISHED.with_label_values(&["orders"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("ec_bus_messages_published_total"));
    }
}
