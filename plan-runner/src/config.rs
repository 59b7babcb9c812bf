use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Run-wide parameters from the `config` block of a plan file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub name: String,
    /// Maximum concurrently running tasks in a parallel phase
    pub workers: usize,
    /// Per-task timeout in seconds
    pub timeout: u64,
    /// Maximum attempts per task per invocation
    pub retries: u32,
    /// Backoff base in seconds
    pub retry_delay: f64,
    pub model: String,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub state_file: PathBuf,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            name: "Unnamed Plan".to_string(),
            workers: 5,
            timeout: 3600,
            retries: 3,
            retry_delay: 5.0,
            model: "sonnet".to_string(),
            working_dir: PathBuf::from("./"),
            output_dir: PathBuf::from("./output"),
            state_file: PathBuf::from("state.json"),
        }
    }
}

impl PlanConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_state_file(mut self, state_file: impl Into<PathBuf>) -> Self {
        self.state_file = state_file.into();
        self
    }

    /// Make relative directories absolute against `base_dir` (the plan file's directory)
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.working_dir.is_relative() {
            self.working_dir = normalize(&base_dir.join(&self.working_dir));
        }
        if self.output_dir.is_relative() {
            self.output_dir = normalize(&base_dir.join(&self.output_dir));
        }
    }

    /// Snapshot location: absolute `state_file` as-is, otherwise under `output_dir`
    pub fn state_path(&self) -> PathBuf {
        if self.state_file.is_absolute() {
            self.state_file.clone()
        } else {
            self.output_dir.join(&self.state_file)
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.workers == 0 {
            return Err(PlanError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.retries == 0 {
            return Err(PlanError::InvalidConfig("retries must be at least 1".to_string()));
        }
        if self.timeout == 0 {
            return Err(PlanError::InvalidConfig("timeout must be positive".to_string()));
        }
        if !self.retry_delay.is_finite() || self.retry_delay < 0.0 {
            return Err(PlanError::InvalidConfig(format!(
                "retry_delay must be a non-negative number, got {}",
                self.retry_delay
            )));
        }
        Ok(())
    }
}

/// Lexically drop `.` components and fold `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlanConfig::default();
        assert_eq!(config.name, "Unnamed Plan");
        assert_eq!(config.workers, 5);
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(5));
        assert_eq!(config.task_timeout(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: PlanConfig = serde_yaml::from_str("name: Docs\nworkers: 2\n").unwrap();
        assert_eq!(config.name, "Docs");
        assert_eq!(config.workers, 2);
        assert_eq!(config.model, "sonnet");
        assert_eq!(config.state_file, PathBuf::from("state.json"));
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = PlanConfig::default();
        config.resolve_paths(Path::new("/plans/site"));
        assert_eq!(config.working_dir, PathBuf::from("/plans/site"));
        assert_eq!(config.output_dir, PathBuf::from("/plans/site/output"));
        assert_eq!(config.state_path(), PathBuf::from("/plans/site/output/state.json"));

        let mut config = PlanConfig {
            output_dir: PathBuf::from("../out"),
            ..Default::default()
        };
        config.resolve_paths(Path::new("/plans/site"));
        assert_eq!(config.output_dir, PathBuf::from("/plans/out"));
    }

    #[test]
    fn test_absolute_state_file() {
        let config = PlanConfig::default().with_state_file("/tmp/run/state.json");
        assert_eq!(config.state_path(), PathBuf::from("/tmp/run/state.json"));
    }

    #[test]
    fn test_validate() {
        assert!(PlanConfig::default().with_workers(0).validate().is_err());
        let config = PlanConfig { retries: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(PlanError::InvalidConfig(_))));
        let config = PlanConfig { retry_delay: -1.0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
