use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use anyhow::{Context, Result};
use chrono::Utc;

use super::model::{ExecutionState, PhaseRecord, StateStats, Status, TaskRecord};
use crate::dag::{Plan, Task};

/// Result of reading a persisted snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Missing,
    Corrupt(String),
}

/// Owner of the run ledger.
///
/// Every mutation runs under one mutex and rewrites the full snapshot before
/// the lock is released, so the file on disk always matches the last
/// completed transition.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<Option<ExecutionState>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<ExecutionState>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fresh ledger with a pending record for every phase and task
    pub fn initialize(&self, plan: &Plan, tasks: &[Task]) -> Result<()> {
        let mut state = ExecutionState::new(&plan.name, plan_file(plan));
        for phase in &plan.phases {
            state.phases.insert(phase.name.clone(), PhaseRecord::new(&phase.name));
        }
        for task in tasks {
            state.tasks.insert(task.id.clone(), TaskRecord::new(&task.id, &task.phase));
        }

        let mut guard = self.lock();
        self.persist(&state)?;
        *guard = Some(state);
        Ok(())
    }

    /// Read the snapshot. Failures degrade to `Missing`/`Corrupt` and leave
    /// the store empty.
    pub fn load(&self) -> LoadOutcome {
        if !self.path.exists() {
            return LoadOutcome::Missing;
        }

        let parsed = fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                serde_json::from_str::<ExecutionState>(&json).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(state) => {
                tracing::info!(
                    "Loaded state from {} ({} tasks)",
                    self.path.display(),
                    state.tasks.len()
                );
                *self.lock() = Some(state);
                LoadOutcome::Loaded
            }
            Err(reason) => {
                tracing::warn!("Could not load state file {}: {}", self.path.display(), reason);
                *self.lock() = None;
                LoadOutcome::Corrupt(reason)
            }
        }
    }

    /// Align a loaded snapshot with the current plan: add records for new
    /// phases and tasks, drop task records the plan no longer generates
    pub fn reconcile(&self, plan: &Plan, tasks: &[Task]) -> Result<()> {
        let mut guard = self.lock();
        if guard.is_none() {
            drop(guard);
            return self.initialize(plan, tasks);
        }
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };

        let mut added = 0;
        for phase in &plan.phases {
            state.phase_mut(&phase.name);
        }
        for task in tasks {
            if !state.tasks.contains_key(&task.id) {
                state.tasks.insert(task.id.clone(), TaskRecord::new(&task.id, &task.phase));
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!("Added {} new tasks to resumed state", added);
        }

        let before = state.tasks.len();
        let current: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        state.tasks.retain(|id, _| current.contains(id.as_str()));
        let dropped = before - state.tasks.len();
        if dropped > 0 {
            tracing::warn!("Dropped {} tasks no longer generated by the plan", dropped);
        }
        state.plan_name = plan.name.clone();
        state.completed_at = None;

        self.persist(state)
    }

    /// Apply `f` to the ledger and persist; `None` when nothing is loaded
    fn mutate<T>(&self, f: impl FnOnce(&mut ExecutionState) -> T) -> Result<Option<T>> {
        let mut guard = self.lock();
        let Some(state) = guard.as_mut() else {
            tracing::warn!("State update ignored: no state initialized");
            return Ok(None);
        };

        let out = f(state);
        self.persist(state)?;
        Ok(Some(out))
    }

    fn mutate_task(&self, task_id: &str, f: impl FnOnce(&mut TaskRecord)) -> Result<Option<u32>> {
        let updated = self.mutate(|state| {
            state.tasks.get_mut(task_id).map(|record| {
                f(record);
                record.attempts
            })
        })?;

        let attempts = updated.flatten();
        if attempts.is_none() {
            tracing::warn!("State update for unknown task {} ignored", task_id);
        }
        Ok(attempts)
    }

    /// Mark running and count the attempt; returns the new attempt count
    pub fn task_started(&self, task_id: &str) -> Result<u32> {
        Ok(self.mutate_task(task_id, |r| r.start())?.unwrap_or(0))
    }

    pub fn task_completed(&self, task_id: &str, outputs: BTreeMap<String, String>) -> Result<()> {
        self.mutate_task(task_id, |r| r.complete(outputs))?;
        Ok(())
    }

    pub fn task_failed(&self, task_id: &str, error: &str) -> Result<()> {
        self.mutate_task(task_id, |r| r.fail(error))?;
        Ok(())
    }

    pub fn phase_started(&self, phase_name: &str) -> Result<()> {
        self.mutate(|state| state.phase_mut(phase_name).start())?;
        Ok(())
    }

    pub fn phase_completed(&self, phase_name: &str) -> Result<()> {
        self.finish_phase(phase_name, Status::Completed)
    }

    pub fn phase_failed(&self, phase_name: &str) -> Result<()> {
        self.finish_phase(phase_name, Status::Failed)
    }

    pub fn phase_skipped(&self, phase_name: &str) -> Result<()> {
        self.finish_phase(phase_name, Status::Skipped)
    }

    fn finish_phase(&self, phase_name: &str, status: Status) -> Result<()> {
        self.mutate(|state| state.phase_mut(phase_name).finish(status))?;
        Ok(())
    }

    pub fn execution_completed(&self) -> Result<()> {
        self.mutate(|state| state.completed_at = Some(Utc::now()))?;
        Ok(())
    }

    pub fn task_status(&self, task_id: &str) -> Option<Status> {
        self.lock().as_ref()?.tasks.get(task_id).map(|r| r.status)
    }

    pub fn phase_status(&self, phase_name: &str) -> Option<Status> {
        self.lock().as_ref()?.phases.get(phase_name).map(|r| r.status)
    }

    /// Recorded outputs of a completed task; `None` for any other status
    pub fn completed_outputs(&self, task_id: &str) -> Option<BTreeMap<String, String>> {
        let guard = self.lock();
        let record = guard.as_ref()?.tasks.get(task_id)?;
        record.is_completed().then(|| record.outputs.clone())
    }

    pub fn is_task_completed(&self, task_id: &str) -> bool {
        self.task_status(task_id) == Some(Status::Completed)
    }

    pub fn is_phase_completed(&self, phase_name: &str) -> bool {
        self.lock()
            .as_ref()
            .map(|state| state.is_phase_complete(phase_name))
            .unwrap_or(false)
    }

    pub fn task_attempts(&self, task_id: &str) -> u32 {
        self.lock()
            .as_ref()
            .and_then(|state| state.tasks.get(task_id))
            .map(|r| r.attempts)
            .unwrap_or(0)
    }

    /// Non-terminal task ids of a phase (pending, running or failed)
    pub fn pending_tasks(&self, phase_name: &str) -> Vec<String> {
        self.lock()
            .as_ref()
            .map(|state| {
                state
                    .phase_tasks(phase_name)
                    .filter(|r| !r.status.is_terminal())
                    .map(|r| r.task_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(task id, error message)` of every failed task
    pub fn failed_tasks(&self) -> Vec<(String, String)> {
        self.lock()
            .as_ref()
            .map(|state| {
                state
                    .tasks
                    .values()
                    .filter(|r| r.status == Status::Failed)
                    .map(|r| (r.task_id.clone(), r.error_message.clone().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StateStats {
        self.lock()
            .as_ref()
            .map(|state| state.stats())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<ExecutionState> {
        self.lock().clone()
    }

    /// Write the whole state to a temp file and rename it over the snapshot
    fn persist(&self, state: &ExecutionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory {}", parent.display())
                })?;
            }
        }

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let json = serde_json::to_string_pretty(state)?;
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write state to {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        Ok(())
    }
}

fn plan_file(plan: &Plan) -> String {
    plan.source
        .as_ref()
        .unwrap_or(&plan.config.working_dir)
        .display()
        .to_string()
}
