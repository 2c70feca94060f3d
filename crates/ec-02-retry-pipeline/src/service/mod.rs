mod processor;

pub use processor::RetryingProcessor;
