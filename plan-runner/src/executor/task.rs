use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use crate::cli::TaskRunner;
use crate::dag::Task;
use crate::state::StateStore;

/// Result of one task invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub success: bool,
    /// Attempts made during this invocation
    pub attempts: u32,
    pub error: Option<String>,
    pub outputs: BTreeMap<String, String>,
}

/// Runs one task through its retry loop, recording each transition
pub struct TaskExecutor {
    runner: Arc<dyn TaskRunner>,
    store: Arc<StateStore>,
    policy: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(runner: Arc<dyn TaskRunner>, store: Arc<StateStore>, policy: RetryPolicy) -> Self {
        Self {
            runner,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Apply a state transition on the blocking pool. Every transition
    /// rewrites the snapshot file, which must not stall runtime workers.
    pub(crate) async fn record<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StateStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .context("State writer panicked")?
    }

    /// Up to `max_attempts` attempts; the persisted attempt counter keeps
    /// growing across invocations.
    pub async fn execute(&self, task: &Task) -> Result<TaskOutcome> {
        let pending = task.pending_requirements();
        if !pending.is_empty() {
            tracing::warn!(
                "[{}] Running with unresolved requirements: {}",
                task.id,
                pending.join(", ")
            );
        }

        let max = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            let id = task.id.clone();
            let total = self.record(move |store| store.task_started(&id)).await?;
            tracing::info!("[{}] Attempt {}/{} (#{} overall)", task.id, attempt, max, total);

            let result = self.runner.run(&task.prompt, &task.id).await;

            if result.success {
                let (id, outputs) = (task.id.clone(), task.outputs.clone());
                self.record(move |store| store.task_completed(&id, outputs)).await?;
                tracing::info!("[{}] Completed", task.id);
                if result.input_tokens.is_some() || result.output_tokens.is_some() {
                    let input = result.input_tokens.unwrap_or(0);
                    let output = result.output_tokens.unwrap_or(0);
                    tracing::info!(
                        "[{}] Context: {} in + {} out = {} tokens",
                        task.id,
                        input,
                        output,
                        input + output
                    );
                }

                return Ok(TaskOutcome {
                    task_id: task.id.clone(),
                    success: true,
                    attempts: attempt,
                    error: None,
                    outputs: task.outputs.clone(),
                });
            }

            last_error = result.error_text();
            tracing::warn!("[{}] Attempt {} failed: {}", task.id, attempt, last_error);

            if self.policy.should_retry(attempt) {
                let delay = self.policy.delay_for(attempt);
                tracing::info!("[{}] Retrying in {:?}", task.id, delay);
                tokio::time::sleep(delay).await;
            }
        }

        let (id, error) = (task.id.clone(), last_error.clone());
        self.record(move |store| store.task_failed(&id, &error)).await?;
        tracing::warn!("[{}] Failed after {} attempts", task.id, max);

        Ok(TaskOutcome {
            task_id: task.id.clone(),
            success: false,
            attempts: max,
            error: Some(last_error),
            outputs: BTreeMap::new(),
        })
    }
}
