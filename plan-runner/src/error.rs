//! Error types for plan loading, validation and generation
//!
//! Runtime task failures are not errors: they are recorded in the state store
//! and reported in the run summary. The variants here abort a run before any
//! task is dispatched.

use thiserror::Error;

/// Structural and configuration errors raised while preparing a run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Plan file could not be parsed
    #[error("Plan parse error: {0}")]
    Parse(String),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A data source could not be loaded
    #[error("Data source '{name}' could not be loaded: {reason}")]
    DataSource { name: String, reason: String },

    /// The phase dependency graph contains a cycle
    #[error("Cycle detected in phase dependencies among: {}", phases.join(", "))]
    PhaseCycle { phases: Vec<String> },

    /// A phase depends on a phase that does not exist
    #[error("Phase '{phase}' depends on unknown phase '{dependency}'")]
    UnknownDependency { phase: String, dependency: String },

    /// `--phase` named a phase that does not exist
    #[error("Phase not found: {0}")]
    PhaseNotFound(String),

    /// Two generated tasks rendered the same id
    #[error(
        "Duplicate task id '{task_id}' generated by template '{template}' (item: {item}); \
         already produced by template '{first_template}'"
    )]
    DuplicateTaskId {
        task_id: String,
        template: String,
        first_template: String,
        item: String,
    },
}
