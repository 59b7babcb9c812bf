use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named output path expression of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// Dependency on another task's recorded output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequirement {
    /// Templated id of the task that produces the output
    pub task: String,
    /// Output name on that task
    #[serde(default)]
    pub output: String,
    /// Name bound under the `requires` scope
    #[serde(rename = "as", default)]
    pub alias: String,
}

/// Template expanded into one task per data item (or exactly one task)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    /// Data reference such as `${data.pages}`; `None` yields a single task
    pub foreach: Option<String>,
    pub task_id: String,
    pub prompt: String,
    #[serde(default)]
    pub outputs: Vec<TaskOutput>,
    #[serde(default)]
    pub requires: Vec<TaskRequirement>,
}

impl TaskTemplate {
    pub fn new(name: impl Into<String>, task_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            foreach: None,
            task_id: task_id.into(),
            prompt: prompt.into(),
            outputs: vec![],
            requires: vec![],
        }
    }

    pub fn with_foreach(mut self, foreach: impl Into<String>) -> Self {
        self.foreach = Some(foreach.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.outputs.push(TaskOutput {
            name: name.into(),
            path: path.into(),
        });
        self
    }

    pub fn with_requirement(
        mut self,
        task: impl Into<String>,
        output: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        self.requires.push(TaskRequirement {
            task: task.into(),
            output: output.into(),
            alias: alias.into(),
        });
        self
    }
}

/// Concrete generated unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub phase: String,
    /// Name of the template that produced this task
    pub template: String,
    pub prompt: String,
    /// Output name -> rendered path
    pub outputs: BTreeMap<String, String>,
    /// Requirement alias -> resolved path or pending sentinel
    pub requirements: BTreeMap<String, String>,
    /// Data item bound while rendering
    pub item: Option<Value>,
}

impl Task {
    /// Requirements still bound to a pending sentinel
    pub fn pending_requirements(&self) -> Vec<&str> {
        self.requirements
            .values()
            .filter(|v| is_pending_sentinel(v))
            .map(|v| v.as_str())
            .collect()
    }
}

/// Placeholder bound to a requirement whose producing task has not completed
pub fn pending_sentinel(task_id: &str, output: &str) -> String {
    format!("[pending:{}.{}]", task_id, output)
}

pub fn is_pending_sentinel(value: &str) -> bool {
    value.starts_with("[pending:") && value.ends_with(']')
}
