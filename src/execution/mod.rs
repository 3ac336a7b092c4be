pub mod engine;
pub mod retry;

pub use engine::ExecutionEngine;
pub use retry::RetryPolicy;
