//! # Runtime Configuration
//!
//! Configuration for one service process, read from `EC_*` environment
//! variables. Every field has a default, so an empty environment yields a
//! self-contained process on in-memory backends.
//!
//! ## Validation
//!
//! - Numeric variables must parse; a malformed value is an error, never
//!   silently replaced by the default.
//! - Counts and durations that would disable a mechanism (prefetch 0, lock
//!   TTL 0) are rejected.
//! - Backend URLs must use a scheme compiled into this binary.

use ec_01_connection::ReconnectPolicy;
use ec_02_retry_pipeline::RetryPolicy;
use ec_03_idempotency::{IdempotencyConfig, LockConfig};
use event_telemetry::TelemetryConfig;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} uses unsupported scheme {scheme:?}")]
    UnsupportedScheme { var: &'static str, scheme: String },

    #[error("{var} needs the `{feature}` feature, which this binary was built without")]
    FeatureDisabled {
        var: &'static str,
        feature: &'static str,
    },
}

/// Where the broker lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBackend {
    Memory,
    Amqp(String),
}

/// Where the cache store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis(String),
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub service_name: String,
    pub broker_url: String,
    pub cache_url: String,
    /// Unacknowledged deliveries per listener.
    pub prefetch: u16,
    /// Wait for broker confirms on every publish.
    pub publish_confirms: bool,
    pub retry: RetryPolicy,
    pub idempotency: IdempotencyConfig,
    pub connect: ReconnectPolicy,
    /// How long in-flight handlers get to finish on shutdown.
    pub shutdown_grace: Duration,
    pub telemetry: TelemetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let service_name = "order-service".to_string();
        Self {
            telemetry: TelemetryConfig {
                service_name: service_name.clone(),
                ..TelemetryConfig::default()
            },
            service_name,
            broker_url: "memory://".to_string(),
            cache_url: "memory://".to_string(),
            prefetch: 1,
            publish_confirms: false,
            retry: RetryPolicy::default(),
            idempotency: IdempotencyConfig::default(),
            connect: ReconnectPolicy::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl RuntimeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let service_name = env.string("EC_SERVICE_NAME", &defaults.service_name);
        let retry = RetryPolicy::new(
            env.parse("EC_MAX_RETRIES", defaults.retry.max_retries)?,
            env.millis("EC_RETRY_DELAY_MS", defaults.retry.delay)?,
        );
        let idempotency = IdempotencyConfig {
            record_ttl: env.secs("EC_IDEMPOTENCY_TTL_SECS", defaults.idempotency.record_ttl)?,
            lock: LockConfig {
                ttl: env.secs("EC_LOCK_TTL_SECS", defaults.idempotency.lock.ttl)?,
                ..defaults.idempotency.lock
            },
        };
        let connect = ReconnectPolicy::exponential(
            env.parse("EC_CONNECT_ATTEMPTS", defaults.connect.max_attempts)?,
            env.millis("EC_CONNECT_DELAY_MS", defaults.connect.initial_delay)?,
            defaults.connect.max_delay,
        );
        let telemetry = TelemetryConfig {
            service_name: service_name.clone(),
            log_level: lookup("EC_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.telemetry.log_level),
            console_output: defaults.telemetry.console_output,
            json_logs: env.flag("EC_JSON_LOGS", defaults.telemetry.json_logs)?,
        };

        Ok(Self {
            broker_url: env.string("EC_BROKER_URL", &defaults.broker_url),
            cache_url: env.string("EC_CACHE_URL", &defaults.cache_url),
            prefetch: env.parse("EC_PREFETCH", defaults.prefetch)?,
            publish_confirms: env.flag("EC_PUBLISH_CONFIRMS", defaults.publish_confirms)?,
            shutdown_grace: env.secs("EC_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace)?,
            service_name,
            retry,
            idempotency,
            connect,
            telemetry,
        })
    }

    /// Reject settings that would disable a delivery guarantee.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefetch == 0 {
            return Err(invalid("EC_PREFETCH", "0", "must be at least 1"));
        }
        if self.retry.delay.is_zero() {
            return Err(invalid("EC_RETRY_DELAY_MS", "0", "must be positive"));
        }
        if self.idempotency.lock.ttl.is_zero() {
            return Err(invalid("EC_LOCK_TTL_SECS", "0", "must be positive"));
        }
        if self.idempotency.record_ttl.is_zero() {
            return Err(invalid("EC_IDEMPOTENCY_TTL_SECS", "0", "must be positive"));
        }
        if self.service_name.trim().is_empty() {
            return Err(invalid("EC_SERVICE_NAME", "", "must not be empty"));
        }
        self.broker_backend()?;
        self.cache_backend()?;
        Ok(())
    }

    pub fn broker_backend(&self) -> Result<BrokerBackend, ConfigError> {
        const VAR: &str = "EC_BROKER_URL";
        match scheme(&self.broker_url) {
            "memory" => Ok(BrokerBackend::Memory),
            "amqp" | "amqps" if cfg!(feature = "amqp") => {
                Ok(BrokerBackend::Amqp(self.broker_url.clone()))
            }
            "amqp" | "amqps" => Err(ConfigError::FeatureDisabled {
                var: VAR,
                feature: "amqp",
            }),
            other => Err(ConfigError::UnsupportedScheme {
                var: VAR,
                scheme: other.to_string(),
            }),
        }
    }

    pub fn cache_backend(&self) -> Result<CacheBackend, ConfigError> {
        const VAR: &str = "EC_CACHE_URL";
        match scheme(&self.cache_url) {
            "memory" => Ok(CacheBackend::Memory),
            "redis" | "rediss" if cfg!(feature = "redis") => {
                Ok(CacheBackend::Redis(self.cache_url.clone()))
            }
            "redis" | "rediss" => Err(ConfigError::FeatureDisabled {
                var: VAR,
                feature: "redis",
            }),
            other => Err(ConfigError::UnsupportedScheme {
                var: VAR,
                scheme: other.to_string(),
            }),
        }
    }

    /// Queue names are prefixed with the service name so that every
    /// service gets its own copy of each event.
    pub fn queue_name(&self, suffix: &str) -> String {
        format!("{}.{}", self.service_name, suffix)
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str, default: &str) -> String {
        (self.lookup)(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(var) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
        }
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match (self.lookup)(var) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(invalid(var, &raw, "expected true or false")),
            },
        }
    }

    fn millis(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = self.parse(var, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
        Ok(Duration::from_millis(millis))
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.parse(var, default.as_secs())?))
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn scheme(url: &str) -> &str {
    url.split_once("://").map_or("", |(scheme, _)| scheme)
}
