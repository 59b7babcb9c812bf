mod graph;
mod plan;
mod task;

pub use graph::PhaseGraph;
pub use plan::{DataSource, DataSourceKind, ExecutionMode, Phase, Plan, PlanBuilder};
pub use task::{
    is_pending_sentinel, pending_sentinel, Task, TaskOutput, TaskRequirement, TaskTemplate,
};
