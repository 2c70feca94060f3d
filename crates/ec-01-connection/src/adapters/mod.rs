//! Connector implementations.

mod memory;

#[cfg(feature = "amqp")]
mod amqp;
#[cfg(feature = "redis")]
mod redis;

pub use memory::{MemoryBrokerConnector, MemoryStoreConnector};

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
#[cfg(feature = "redis")]
pub use self::redis::RedisConnector;

/// Strip `user:password@` from a connection URL for logging.
#[cfg(any(feature = "amqp", feature = "redis"))]
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
