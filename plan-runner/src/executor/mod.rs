mod phase;
mod retry;
mod task;

pub use phase::{PhaseExecutor, PhaseOutcome};
pub use retry::RetryPolicy;
pub use task::{TaskExecutor, TaskOutcome};
