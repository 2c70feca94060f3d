pub mod errors;
pub mod policy;

pub use errors::ConnectionError;
pub use policy::{BackoffStrategy, ReconnectPolicy};
