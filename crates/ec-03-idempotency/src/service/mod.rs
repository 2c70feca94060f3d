pub mod handler;
pub mod lock;
pub mod manager;
pub mod records;

pub use handler::IdempotentHandler;
pub use lock::{LockManager, LockToken};
pub use manager::{Execution, IdempotencyManager};
pub use records::RecordStore;
