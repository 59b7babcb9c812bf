use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::graph::PhaseGraph;
use super::task::TaskTemplate;
use crate::config::PlanConfig;
use crate::error::PlanError;

/// How a phase dispatches its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Ok(ExecutionMode::Parallel),
            "sequential" => Ok(ExecutionMode::Sequential),
            other => Err(PlanError::Parse(format!("Unknown execution mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    #[default]
    Inline,
    File,
}

/// Named collection of items that templates iterate over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: DataSourceKind,
    #[serde(default)]
    pub items: Vec<Value>,
    /// File path for `type: file`, relative to the working directory
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl DataSource {
    pub fn inline(name: impl Into<String>, items: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind: DataSourceKind::Inline,
            items,
            file: None,
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: DataSourceKind::File,
            items: vec![],
            file: Some(path.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub templates: Vec<TaskTemplate>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            execution: ExecutionMode::Parallel,
            depends_on: vec![],
            templates: vec![],
        }
    }

    pub fn sequential(mut self) -> Self {
        self.execution = ExecutionMode::Sequential;
        self
    }

    pub fn depends_on(mut self, phase: impl Into<String>) -> Self {
        self.depends_on.push(phase.into());
        self
    }

    pub fn template(mut self, template: TaskTemplate) -> Self {
        self.templates.push(template);
        self
    }
}

/// Parsed multi-phase plan
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub name: String,
    pub config: PlanConfig,
    pub variables: Map<String, Value>,
    pub data_sources: BTreeMap<String, DataSource>,
    pub phases: Vec<Phase>,
    /// File the plan was parsed from, if any
    pub source: Option<PathBuf>,
}

impl Plan {
    pub fn get_phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Phases in stable dependency order
    pub fn phase_order(&self) -> Result<Vec<&Phase>, PlanError> {
        let order = PhaseGraph::from_phases(&self.phases)?.execution_order()?;
        Ok(order
            .iter()
            .filter_map(|name| self.get_phase(name))
            .collect())
    }

    /// Validate configuration and phase structure
    pub fn validate(&self) -> Result<(), PlanError> {
        self.config.validate()?;
        self.validate_structure()
    }

    /// Phase names, data sources and dependencies, without the config
    pub fn validate_structure(&self) -> Result<(), PlanError> {
        let mut seen = std::collections::HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name.as_str()) {
                return Err(PlanError::Parse(format!("Duplicate phase name: {}", phase.name)));
            }
        }

        for source in self.data_sources.values() {
            if source.kind == DataSourceKind::File && source.file.is_none() {
                return Err(PlanError::DataSource {
                    name: source.name.clone(),
                    reason: "file source has no 'file' path".to_string(),
                });
            }
        }

        self.phase_order()?;
        Ok(())
    }
}

/// Builder for creating plans programmatically
pub struct PlanBuilder {
    plan: Plan,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            plan: Plan {
                name: name.clone(),
                config: PlanConfig {
                    name,
                    ..Default::default()
                },
                variables: Map::new(),
                data_sources: BTreeMap::new(),
                phases: vec![],
                source: None,
            },
        }
    }

    /// Replace the config, keeping the plan name
    pub fn config(mut self, config: PlanConfig) -> Self {
        self.plan.name = config.name.clone();
        self.plan.config = config;
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.plan.variables.insert(name.into(), value.into());
        self
    }

    pub fn data_source(mut self, source: DataSource) -> Self {
        self.plan.data_sources.insert(source.name.clone(), source);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.plan.phases.push(phase);
        self
    }

    /// Build and validate the plan
    pub fn build(self) -> Result<Plan, PlanError> {
        self.plan.validate()?;
        Ok(self.plan)
    }

    /// Build without validation (for testing)
    pub fn build_unchecked(self) -> Plan {
        self.plan
    }
}
