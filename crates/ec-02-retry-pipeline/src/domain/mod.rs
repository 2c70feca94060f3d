pub mod decision;
pub mod policy;
pub mod topology;

pub use decision::{decide, QuarantineReason, RetryDecision};
pub use policy::RetryPolicy;
pub use topology::{RetryTopology, ROUTE_FAILED, ROUTE_POISON, ROUTE_RETRY};
