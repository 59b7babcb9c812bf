use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::{Map, Value};

use crate::dag::Plan;

/// Reserved identifier bound to the id of the task being rendered
pub const TASK_ID: &str = "TASK_ID";

/// Layered namespace for template resolution.
///
/// Each scope is a shared JSON value, so deriving a context with `with_*`
/// only replaces the changed scope.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    config: Arc<Value>,
    data: Arc<Value>,
    item: Arc<Value>,
    requires: Arc<Value>,
    variables: Arc<Value>,
    task_id: Option<Arc<str>>,
}

impl Default for TemplateContext {
    fn default() -> Self {
        let empty = Arc::new(Value::Object(Map::new()));
        Self {
            config: empty.clone(),
            data: empty.clone(),
            item: empty.clone(),
            requires: empty.clone(),
            variables: empty,
            task_id: None,
        }
    }
}

impl TemplateContext {
    pub fn new(config: Value, data: Value, variables: Value) -> Self {
        Self {
            config: Arc::new(config),
            data: Arc::new(data),
            variables: Arc::new(variables),
            ..Default::default()
        }
    }

    /// Base context of a plan: its config, loaded data sets and variables
    pub fn from_plan(plan: &Plan, data: &BTreeMap<String, Vec<Value>>) -> Self {
        let config = serde_json::to_value(&plan.config).unwrap_or_else(|_| Value::Object(Map::new()));
        let data: Map<String, Value> = data
            .iter()
            .map(|(name, items)| (name.clone(), Value::Array(items.clone())))
            .collect();

        Self::new(config, Value::Object(data), Value::Object(plan.variables.clone()))
    }

    pub fn with_item(&self, item: Value) -> Self {
        Self {
            item: Arc::new(item),
            ..self.clone()
        }
    }

    pub fn with_task_id(&self, task_id: impl AsRef<str>) -> Self {
        Self {
            task_id: Some(Arc::from(task_id.as_ref())),
            ..self.clone()
        }
    }

    pub fn with_requires(&self, requires: &BTreeMap<String, String>) -> Self {
        let requires: Map<String, Value> = requires
            .iter()
            .map(|(alias, path)| (alias.clone(), Value::String(path.clone())))
            .collect();

        Self {
            requires: Arc::new(Value::Object(requires)),
            ..self.clone()
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn item(&self) -> &Value {
        &self.item
    }

    /// Resolve a dotted path. Never fails: anything unresolvable is `""`.
    ///
    /// `config.workers`, `item.route`, `data.pages.0.title`, `requires.spec`
    /// and `TASK_ID` address scopes directly. Any other first segment is looked
    /// up as a whole path inside `variables`.
    pub fn resolve(&self, path: &str) -> Value {
        let path = path.trim();
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();

        if head == TASK_ID {
            return Value::String(self.task_id.as_deref().unwrap_or_default().to_string());
        }

        let scope = match head {
            "config" => &self.config,
            "data" => &self.data,
            "item" => &self.item,
            "requires" => &self.requires,
            "variables" => &self.variables,
            _ => {
                if self.variables.get(head).is_some() {
                    return lookup(&self.variables, path.split('.'));
                }
                return empty();
            }
        };

        lookup(scope, parts)
    }
}

fn empty() -> Value {
    Value::String(String::new())
}

fn lookup<'a>(root: &Value, parts: impl Iterator<Item = &'a str>) -> Value {
    let mut current = root;
    for part in parts {
        let next = match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return empty(),
        }
    }

    if current.is_null() {
        empty()
    } else {
        current.clone()
    }
}
