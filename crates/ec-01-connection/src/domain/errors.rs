use thiserror::Error;

/// Connection lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// One attempt to open a connection failed.
    #[error("{target} at {endpoint} unreachable: {reason}")]
    Open {
        target: &'static str,
        endpoint: String,
        reason: String,
    },

    /// Every attempt allowed by the policy failed. Fatal at startup.
    #[error("{target} at {endpoint} unreachable after {attempts} attempts: {last_error}")]
    Exhausted {
        target: &'static str,
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    /// `handle()` called before `connect()` or after `close()`.
    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("closing {target} failed: {reason}")]
    Close { target: &'static str, reason: String },

    /// The configured URL scheme has no connector in this build.
    #[error("unsupported endpoint: {0}")]
    Unsupported(String),
}
