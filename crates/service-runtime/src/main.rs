//! # Commerce Service Runtime
//!
//! Entry point for one service process.
//!
//! ## Startup Sequence
//!
//! 1. Load and validate configuration from `EC_*` variables
//! 2. Initialize logging and metrics
//! 3. Connect to broker and cache (bounded backoff; fatal on exhaustion)
//! 4. Declare exchanges and retry queues
//! 5. Start listeners
//! 6. On SIGTERM or Ctrl-C: stop consuming, drain, close connections

use anyhow::{Context, Result};
use service_runtime::{RuntimeConfig, ServiceRuntime};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env().context("loading configuration")?;
    let _telemetry =
        event_telemetry::init_telemetry(&config.telemetry).context("initializing telemetry")?;

    info!(
        service = %config.service_name,
        prefetch = config.prefetch,
        max_retries = config.retry.max_retries,
        "Starting service"
    );

    let runtime = ServiceRuntime::connect(config)
        .await
        .context("connecting to backends")?;
    runtime
        .declare_topology()
        .await
        .context("declaring topology")?;
    runtime.start();

    info!("Service is running. Press Ctrl+C to stop.");
    let report = runtime.run_until_shutdown().await;
    if !report.is_clean() {
        warn!(still_running = report.still_running, "Exited with handlers still running");
    }
    Ok(())
}
