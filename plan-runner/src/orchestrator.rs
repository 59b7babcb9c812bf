use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cli::TaskRunner;
use crate::dag::{ExecutionMode, Phase, Plan, Task};
use crate::error::PlanError;
use crate::executor::{PhaseExecutor, PhaseOutcome, RetryPolicy, TaskExecutor};
use crate::generator::TaskGenerator;
use crate::plan::DataLoader;
use crate::state::{LoadOutcome, StateStats, StateStore};
use crate::template::{TemplateContext, TemplateEngine};

/// Per-invocation switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reuse the persisted state and skip completed tasks
    pub resume: bool,
    /// Generate and report tasks without running anything
    pub dry_run: bool,
    /// Restrict the run to one phase
    pub phase: Option<String>,
    /// Override the configured worker count
    pub workers: Option<usize>,
}

/// What a dry run would dispatch for one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPhase {
    pub name: String,
    pub execution: ExecutionMode,
    pub depends_on: Vec<String>,
    pub task_ids: Vec<String>,
}

/// A phase not run because a dependency was incomplete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPhase {
    pub name: String,
    pub dependency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub plan_name: String,
    pub dry_run: bool,
    pub total_tasks: usize,
    /// Phase order of a dry run
    pub planned: Vec<PlannedPhase>,
    pub phases: Vec<PhaseOutcome>,
    pub skipped: Vec<SkippedPhase>,
    pub stats: StateStats,
    /// `(task id, error)` of failed tasks
    pub failed_tasks: Vec<(String, String)>,
    pub state_file: PathBuf,
}

impl RunSummary {
    /// No failed task and no skipped phase
    pub fn success(&self) -> bool {
        self.dry_run || (self.failed_tasks.is_empty() && self.skipped.is_empty())
    }
}

/// Drives a plan: generation, state setup, then phases in dependency order
pub struct Orchestrator {
    plan: Plan,
    runner: Arc<dyn TaskRunner>,
    store: Arc<StateStore>,
    engine: TemplateEngine,
}

impl Orchestrator {
    pub fn new(plan: Plan, runner: Arc<dyn TaskRunner>) -> Self {
        let store = Arc::new(StateStore::new(plan.config.state_path()));
        Self {
            plan,
            runner,
            store,
            engine: TemplateEngine::new(),
        }
    }

    /// Use an engine with additional filters
    pub fn with_engine(mut self, engine: TemplateEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub async fn execute(&self, options: RunOptions) -> Result<RunSummary> {
        let plan = &self.plan;
        let mut config = plan.config.clone();
        if let Some(workers) = options.workers {
            config.workers = workers;
        }
        config.validate()?;
        plan.validate_structure()?;

        let order = plan.phase_order()?;
        if let Some(name) = &options.phase {
            if plan.get_phase(name).is_none() {
                return Err(PlanError::PhaseNotFound(name.clone()).into());
            }
        }

        tracing::info!(
            "Plan {} (dry run: {}, resume: {}, workers: {})",
            plan.name,
            options.dry_run,
            options.resume,
            config.workers
        );

        let data = DataLoader::new(&config.working_dir).load_all(&plan.data_sources)?;
        for (name, items) in &data {
            tracing::info!("Data source {}: {} items", name, items.len());
        }

        let generator = TaskGenerator::new(self.engine.clone(), TemplateContext::from_plan(plan, &data));

        let resumed = if options.resume && !options.dry_run {
            match self.store.load() {
                LoadOutcome::Loaded => true,
                LoadOutcome::Missing => {
                    tracing::info!("No previous state at {}; starting fresh", self.store.path().display());
                    false
                }
                LoadOutcome::Corrupt(reason) => {
                    tracing::warn!("Discarding unreadable state ({}); starting fresh", reason);
                    false
                }
            }
        } else {
            false
        };

        let tasks = generator.generate_all(plan, &self.store)?;

        if options.dry_run {
            return Ok(self.dry_run_summary(&order, &tasks));
        }

        if resumed {
            self.store.reconcile(plan, &tasks)?;
        } else {
            self.store.initialize(plan, &tasks)?;
        }

        let executor = Arc::new(TaskExecutor::new(
            self.runner.clone(),
            self.store.clone(),
            RetryPolicy::from_config(&config),
        ));
        let phase_executor = PhaseExecutor::new(executor, config.workers);

        let mut outcomes = vec![];
        let mut skipped = vec![];

        for phase in order {
            if options.phase.as_deref().is_some_and(|name| name != phase.name) {
                continue;
            }

            if let Some(dependency) = self.unmet_dependency(phase) {
                tracing::warn!(
                    "Skipping phase {}: dependency {} not completed",
                    phase.name,
                    dependency
                );
                self.store.phase_skipped(&phase.name)?;
                skipped.push(SkippedPhase {
                    name: phase.name.clone(),
                    dependency,
                });
                continue;
            }

            let phase_tasks = generator.generate_phase(phase, &self.store)?;
            let outcome = phase_executor.execute(phase, phase_tasks, options.resume).await?;
            outcomes.push(outcome);
        }

        self.store.execution_completed()?;

        Ok(RunSummary {
            plan_name: plan.name.clone(),
            dry_run: false,
            total_tasks: tasks.len(),
            planned: vec![],
            phases: outcomes,
            skipped,
            stats: self.store.stats(),
            failed_tasks: self.store.failed_tasks(),
            state_file: self.store.path().to_path_buf(),
        })
    }

    fn unmet_dependency(&self, phase: &Phase) -> Option<String> {
        phase
            .depends_on
            .iter()
            .find(|dep| !self.store.is_phase_completed(dep))
            .cloned()
    }

    fn dry_run_summary(&self, order: &[&Phase], tasks: &[Task]) -> RunSummary {
        let planned = order
            .iter()
            .map(|phase| PlannedPhase {
                name: phase.name.clone(),
                execution: phase.execution,
                depends_on: phase.depends_on.clone(),
                task_ids: tasks
                    .iter()
                    .filter(|t| t.phase == phase.name)
                    .map(|t| t.id.clone())
                    .collect(),
            })
            .collect();

        RunSummary {
            plan_name: self.plan.name.clone(),
            dry_run: true,
            total_tasks: tasks.len(),
            planned,
            phases: vec![],
            skipped: vec![],
            stats: StateStats::default(),
            failed_tasks: vec![],
            state_file: self.store.path().to_path_buf(),
        }
    }
}
