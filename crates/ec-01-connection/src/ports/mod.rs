pub mod outbound;

pub use outbound::Connector;
