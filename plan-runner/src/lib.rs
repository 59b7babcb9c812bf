pub mod cli;
pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod plan;
pub mod state;
pub mod template;

pub use cli::{ClaudeRunner, RunOutput, TaskRunner};
pub use config::PlanConfig;
pub use dag::{ExecutionMode, Phase, PhaseGraph, Plan, PlanBuilder, Task, TaskTemplate};
pub use error::PlanError;
pub use executor::{PhaseExecutor, RetryPolicy, TaskExecutor};
pub use generator::TaskGenerator;
pub use orchestrator::{Orchestrator, RunOptions, RunSummary};
pub use plan::{parse_plan, parse_plan_file, DataLoader};
pub use state::{LoadOutcome, StateStore, Status};
pub use template::{TemplateContext, TemplateEngine};
