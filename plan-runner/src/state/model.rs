use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by tasks and phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        }
    }

    /// Terminal statuses are not re-submitted on resume
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Skipped)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub phase_name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Output name -> path; non-empty only while completed
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>, phase_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase_name: phase_name.into(),
            status: Status::Pending,
            started_at: None,
            completed_at: None,
            attempts: 0,
            error_message: None,
            outputs: BTreeMap::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = Status::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.attempts += 1;
        self.outputs.clear();
    }

    pub fn complete(&mut self, outputs: BTreeMap<String, String>) {
        self.status = Status::Completed;
        self.completed_at = Some(Utc::now());
        self.outputs = outputs;
        self.error_message = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = Status::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        self.outputs.clear();
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    pub fn new(phase_name: impl Into<String>) -> Self {
        Self {
            phase_name: phase_name.into(),
            status: Status::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = Status::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
    }

    pub fn finish(&mut self, status: Status) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Persisted run ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub plan_name: String,
    pub plan_file: String,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseRecord>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl ExecutionState {
    pub fn new(plan_name: impl Into<String>, plan_file: impl Into<String>) -> Self {
        Self {
            plan_name: plan_name.into(),
            plan_file: plan_file.into(),
            started_at: Utc::now(),
            completed_at: None,
            phases: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// Phase record, created on first use
    pub fn phase_mut(&mut self, phase_name: &str) -> &mut PhaseRecord {
        self.phases
            .entry(phase_name.to_string())
            .or_insert_with(|| PhaseRecord::new(phase_name))
    }

    pub fn phase_tasks<'a>(&'a self, phase_name: &'a str) -> impl Iterator<Item = &'a TaskRecord> + 'a {
        self.tasks.values().filter(move |t| t.phase_name == phase_name)
    }

    /// All tasks of the phase completed; vacuously true for a phase without tasks
    pub fn is_phase_complete(&self, phase_name: &str) -> bool {
        self.phase_tasks(phase_name).all(|t| t.is_completed())
    }

    pub fn stats(&self) -> StateStats {
        let mut stats = StateStats {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                Status::Pending => stats.pending += 1,
                Status::Running => stats.running += 1,
                Status::Completed => stats.completed += 1,
                Status::Failed => stats.failed += 1,
                Status::Skipped => stats.skipped += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub running: usize,
    pub skipped: usize,
}
