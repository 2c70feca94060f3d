//! Graceful shutdown.
//!
//! One `watch` channel carries the termination flag to every supervised
//! task. Draining waits for those tasks up to a grace period and never
//! aborts them; a task still running when the grace period ends is left to
//! finish on its own while the process proceeds to close connections.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Result of [`ShutdownCoordinator::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub still_running: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.still_running == 0
    }
}

/// Cloneable handle that can request shutdown from inside a supervised task.
#[derive(Clone)]
pub struct ShutdownTrigger {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Broadcast shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.signal.send_replace(true) {
            info!("Shutdown requested");
        }
    }
}

pub struct ShutdownCoordinator {
    signal: Arc<watch::Sender<bool>>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
            tasks: Mutex::new(Vec::new()),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.signal.borrow()
    }

    /// Run a task that will be waited for on drain.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(task);
        self.tasks.lock().push((name, handle));
    }

    pub fn trigger_handle(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Broadcast shutdown. Idempotent.
    pub fn trigger(&self) {
        self.trigger_handle().trigger();
    }

    /// Wait for Ctrl-C, SIGTERM or a programmatic `trigger`, then trigger.
    pub async fn wait_for_signal(&self) {
        let mut triggered = self.subscribe();
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Ctrl-C handler unavailable");
                }
                info!("Received Ctrl-C");
            }
            _ = terminate() => info!("Received SIGTERM"),
            _ = async { let _ = triggered.wait_for(|flag| *flag).await; } => {}
        }
        self.trigger();
    }

    /// Wait for every spawned task, at most `grace`.
    pub async fn drain(&self) -> DrainReport {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let total = tasks.len();

        let waited = tokio::time::timeout(self.grace, async {
            for (name, handle) in tasks.iter_mut() {
                if let Err(e) = handle.await {
                    warn!(task = %name, error = %e, "Task ended abnormally");
                }
            }
        })
        .await;

        let still_running: Vec<&str> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.as_str())
            .collect();

        let report = DrainReport {
            completed: total - still_running.len(),
            still_running: still_running.len(),
        };
        if waited.is_err() {
            warn!(
                grace_ms = self.grace.as_millis() as u64,
                pending = ?still_running,
                "Grace period elapsed with tasks still running"
            );
        } else {
            info!(tasks = total, "All tasks drained");
        }
        report
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
