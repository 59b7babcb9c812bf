use std::sync::Arc;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::task::{TaskExecutor, TaskOutcome};
use crate::dag::{ExecutionMode, Phase, Task};
use crate::state::Status;

/// Tallies of one phase run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: String,
    pub status: Status,
    pub completed: usize,
    pub failed: usize,
    /// Tasks not dispatched because they were already completed
    pub already_completed: usize,
}

/// Dispatches a phase's tasks in parallel (bounded) or in sequence
pub struct PhaseExecutor {
    executor: Arc<TaskExecutor>,
    workers: usize,
}

impl PhaseExecutor {
    pub fn new(executor: Arc<TaskExecutor>, workers: usize) -> Self {
        Self {
            executor,
            workers: workers.max(1),
        }
    }

    pub async fn execute(&self, phase: &Phase, tasks: Vec<Task>, resume: bool) -> Result<PhaseOutcome> {
        let store = self.executor.store().clone();
        let name = phase.name.clone();
        self.executor.record(move |s| s.phase_started(&name)).await?;
        tracing::info!(
            "Phase {} started ({}, {} tasks)",
            phase.name,
            phase.execution.as_str(),
            tasks.len()
        );

        let total = tasks.len();
        let tasks: Vec<Task> = if resume {
            tasks
                .into_iter()
                .filter(|t| !store.is_task_completed(&t.id))
                .collect()
        } else {
            tasks
        };
        let already_completed = total - tasks.len();
        if resume {
            tracing::info!("Resume: {} of {} tasks remaining in {}", tasks.len(), total, phase.name);
        }

        let mut outcome = PhaseOutcome {
            phase: phase.name.clone(),
            status: Status::Completed,
            completed: 0,
            failed: 0,
            already_completed,
        };

        if tasks.is_empty() {
            tracing::info!("No tasks to execute in {}", phase.name);
            let name = phase.name.clone();
            self.executor.record(move |s| s.phase_completed(&name)).await?;
            return Ok(outcome);
        }

        let results = match phase.execution {
            ExecutionMode::Parallel => self.run_parallel(tasks).await,
            ExecutionMode::Sequential => self.run_sequential(tasks).await,
        };

        for result in results {
            match result {
                Ok(task) if task.success => outcome.completed += 1,
                Ok(_) => outcome.failed += 1,
                Err(e) => {
                    tracing::error!("Task error in phase {}: {:#}", phase.name, e);
                    outcome.failed += 1;
                }
            }
        }

        let name = phase.name.clone();
        if outcome.failed == 0 {
            self.executor.record(move |s| s.phase_completed(&name)).await?;
        } else {
            outcome.status = Status::Failed;
            self.executor.record(move |s| s.phase_failed(&name)).await?;
        }

        tracing::info!(
            "Phase {} {}: {} completed, {} failed",
            phase.name,
            outcome.status,
            outcome.completed,
            outcome.failed
        );
        Ok(outcome)
    }

    /// Every task gets its own unit of work; a semaphore bounds how many run
    async fn run_parallel(&self, tasks: Vec<Task>) -> Vec<Result<TaskOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for task in tasks {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Worker pool closed")?;
                let result = executor.execute(&task).await;
                if let Err(e) = &result {
                    record_failure(&executor, &task, e).await;
                }
                result
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            results.push(joined.context("Task worker panicked").and_then(|r| r));
        }
        results
    }

    async fn run_sequential(&self, tasks: Vec<Task>) -> Vec<Result<TaskOutcome>> {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = self.executor.execute(&task).await;
            if let Err(e) = &result {
                record_failure(&self.executor, &task, e).await;
            }
            results.push(result);
        }
        results
    }
}

/// Best effort: mark a task failed after an infrastructure error
async fn record_failure(executor: &TaskExecutor, task: &Task, error: &anyhow::Error) {
    let (id, message) = (task.id.clone(), format!("{:#}", error));
    if let Err(e) = executor.record(move |s| s.task_failed(&id, &message)).await {
        tracing::error!("[{}] Could not record failure: {:#}", task.id, e);
    }
}
