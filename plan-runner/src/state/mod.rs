mod model;
mod store;

pub use model::{ExecutionState, PhaseRecord, StateStats, Status, TaskRecord};
pub use store::{LoadOutcome, StateStore};
