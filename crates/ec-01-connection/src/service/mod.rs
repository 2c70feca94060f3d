mod manager;
mod shutdown;

pub use manager::ConnectionManager;
pub use shutdown::{DrainReport, ShutdownCoordinator, ShutdownTrigger};
