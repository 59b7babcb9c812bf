//! Named text transformations applied with `${value | filter(args)}`

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use regex::Regex;
use serde_json::Value;

/// Filter signature: input value plus the call's arguments
pub type FilterFn = Arc<dyn Fn(&Value, &[String]) -> Value + Send + Sync>;

static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static DASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Text form of a value as it appears in rendered output
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Falsy values: null, "", false, zero, empty array or object
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Registry with the built-in filters
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_text("slugify", slugify);
        registry.register_text("basename", basename);
        registry.register_text("dirname", dirname);
        registry.register_text("lower", |s| s.to_lowercase());
        registry.register_text("upper", |s| s.to_uppercase());
        registry.register_text("trim", |s| s.trim().to_string());
        registry.register_text("strip_slashes", |s| s.trim_matches('/').to_string());
        registry.register_text("to_path", to_path);
        registry.register("default", |value, args| {
            if is_truthy(value) {
                Value::String(stringify(value))
            } else {
                Value::String(args.first().cloned().unwrap_or_default())
            }
        });
        registry.register("replace", |value, args| {
            let old = args.first().map(String::as_str).unwrap_or_default();
            let new = args.get(1).map(String::as_str).unwrap_or_default();
            let text = stringify(value);
            if old.is_empty() {
                return Value::String(text);
            }
            Value::String(text.replace(old, new))
        });
        registry
    }

    /// Registry with no filters
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, &[String]) -> Value + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    /// Register a filter that maps the value's text to new text, ignoring arguments
    pub fn register_text<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.register(name, move |value, _args| Value::String(filter(&stringify(value))));
    }

    pub fn has(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).cloned()
    }

    /// Apply a filter by name. Unknown filters return the value unchanged.
    pub fn apply(&self, name: &str, value: Value, args: &[String]) -> Value {
        match self.filters.get(name) {
            Some(filter) => filter(&value, args),
            None => {
                tracing::debug!("Unknown filter '{}' ignored", name);
                value
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}

pub fn slugify(text: &str) -> String {
    let slug = text
        .trim_matches('/')
        .replace('/', "-")
        .to_lowercase()
        .replace(' ', "-");
    let slug = NON_SLUG_RE.replace_all(&slug, "");
    let slug = DASH_RUN_RE.replace_all(&slug, "-");

    if slug.is_empty() {
        "index".to_string()
    } else {
        slug.into_owned()
    }
}

/// Text after the last `/`
pub fn basename(text: &str) -> String {
    match text.rfind('/') {
        Some(i) => text[i + 1..].to_string(),
        None => text.to_string(),
    }
}

/// Text before the last `/`, without trailing slashes unless it is all slashes
pub fn dirname(text: &str) -> String {
    let Some(i) = text.rfind('/') else {
        return String::new();
    };

    let head = &text[..=i];
    if head.chars().all(|c| c == '/') {
        head.to_string()
    } else {
        head.trim_end_matches('/').to_string()
    }
}

pub fn to_path(text: &str) -> String {
    let path = text.trim_matches('/');
    if path.is_empty() {
        "index".to_string()
    } else {
        path.to_string()
    }
}
