use event_telemetry::metrics::CONNECTION_ATTEMPTS;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::{ConnectionError, ReconnectPolicy};
use crate::ports::Connector;

/// Owns one connection and its retry policy.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    handle: RwLock<Option<C::Handle>>,
    /// Bumped on every successful open.
    generation: AtomicU64,
    reconnecting: Mutex<()>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            policy,
            handle: RwLock::new(None),
            generation: AtomicU64::new(0),
            reconnecting: Mutex::new(()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Number of successful opens so far; 0 before the first connect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// `connect() -> Channel | Error`.
    ///
    /// Returns the existing handle if already connected. Otherwise tries up
    /// to `policy.max_attempts` times, sleeping `policy.delay_for(n)` after
    /// failed attempt `n`.
    pub async fn connect(&self) -> Result<C::Handle, ConnectionError> {
        if let Some(handle) = self.handle.read().clone() {
            return Ok(handle);
        }

        let target = self.connector.target();
        let endpoint = self.connector.endpoint();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            info!(target, %endpoint, attempt, max_attempts, "Connecting");
            match self.connector.open().await {
                Ok(handle) => {
                    CONNECTION_ATTEMPTS
                        .with_label_values(&[target, "success"])
                        .inc();
                    info!(target, %endpoint, attempt, "Connected");
                    *self.handle.write() = Some(handle.clone());
                    self.generation.fetch_add(1, Ordering::AcqRel);
                    return Ok(handle);
                }
                Err(e) => {
                    CONNECTION_ATTEMPTS
                        .with_label_values(&[target, "failure"])
                        .inc();
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            target,
                            %endpoint,
                            attempt,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Connection attempt failed"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!(target, %endpoint, attempts = max_attempts, error = %last_error, "Giving up on connection");
        Err(ConnectionError::Exhausted {
            target,
            endpoint,
            attempts: max_attempts,
            last_error,
        })
    }

    /// The open handle.
    pub fn handle(&self) -> Result<C::Handle, ConnectionError> {
        self.handle
            .read()
            .clone()
            .ok_or(ConnectionError::NotConnected(self.connector.target()))
    }

    /// Drop the current handle (closing it best-effort) and connect again.
    pub async fn reconnect(&self) -> Result<C::Handle, ConnectionError> {
        self.reconnect_from(self.generation()).await
    }

    /// Reconnect on behalf of a caller that saw generation `seen` fail.
    ///
    /// Concurrent callers are serialised. If another caller already replaced
    /// that generation, its handle is returned and nothing is reopened.
    pub async fn reconnect_from(&self, seen: u64) -> Result<C::Handle, ConnectionError> {
        let _guard = self.reconnecting.lock().await;
        if self.generation() != seen {
            if let Some(handle) = self.handle.read().clone() {
                return Ok(handle);
            }
        }

        warn!(target = self.connector.target(), generation = seen, "Reconnecting");
        let stale = self.handle.write().take();
        if let Some(stale) = stale {
            if let Err(e) = self.connector.close(&stale).await {
                warn!(target = self.connector.target(), error = %e, "Closing stale connection failed");
            }
        }
        self.connect().await
    }

    /// `close()`: close and forget the handle. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        let handle = self.handle.write().take();
        match handle {
            Some(handle) => {
                self.connector.close(&handle).await?;
                info!(target = self.connector.target(), endpoint = %self.connector.endpoint(), "Connection closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
