use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde_json::{json, Value};

use crate::dag::{DataSource, DataSourceKind};
use crate::error::PlanError;

/// Loads data sources, resolving relative file paths against `base_dir`
#[derive(Debug, Clone)]
pub struct DataLoader {
    base_dir: PathBuf,
}

impl DataLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn load(&self, source: &DataSource) -> Result<Vec<Value>, PlanError> {
        match source.kind {
            DataSourceKind::Inline => Ok(source.items.clone()),
            DataSourceKind::File => {
                let file = source.file.as_ref().ok_or_else(|| PlanError::DataSource {
                    name: source.name.clone(),
                    reason: "file source has no 'file' path".to_string(),
                })?;
                self.load_file(file).map_err(|reason| PlanError::DataSource {
                    name: source.name.clone(),
                    reason,
                })
            }
        }
    }

    pub fn load_all(
        &self,
        sources: &BTreeMap<String, DataSource>,
    ) -> Result<BTreeMap<String, Vec<Value>>, PlanError> {
        let mut data = BTreeMap::new();
        for (name, source) in sources {
            let items = self.load(source)?;
            tracing::debug!("Loaded data source {} ({} items)", name, items.len());
            data.insert(name.clone(), items);
        }
        Ok(data)
    }

    fn load_file(&self, file: &Path) -> Result<Vec<Value>, String> {
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        };

        if !path.exists() {
            return Err(format!("Data file not found: {}", path.display()));
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        let data: Value = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string())?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| e.to_string())?,
            _ => match serde_json::from_str(&content) {
                Ok(value) => value,
                Err(_) => serde_yaml::from_str(&content).map_err(|e| e.to_string())?,
            },
        };

        Ok(into_items(data))
    }
}

/// Normalize a loaded document into a list of items
pub fn into_items(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("items".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        scalar => vec![json!({ "value": scalar })],
    }
}
