pub mod config;
pub mod errors;
pub mod record;

pub use config::{IdempotencyConfig, LockConfig};
pub use errors::IdempotencyError;
pub use record::{lock_key, record_key, IdempotencyRecord, RecordStatus};
