use std::sync::LazyLock;
use regex::{Captures, Regex};
use serde_json::Value;

use super::context::TemplateContext;
use super::filters::{stringify, FilterRegistry};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());
static FILTER_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(\w+)\s*\((.*)\)$").unwrap());

/// Renders `${path | filter | filter(arg, ...)}` expressions
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    filters: FilterRegistry,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(filters: FilterRegistry) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterRegistry {
        &mut self.filters
    }

    /// Substitute every marker; text outside markers is copied verbatim
    pub fn render(&self, template: &str, context: &TemplateContext) -> String {
        MARKER_RE
            .replace_all(template, |caps: &Captures| {
                stringify(&self.evaluate(&caps[1], context))
            })
            .into_owned()
    }

    /// Evaluate one expression (the text between `${` and `}`)
    pub fn evaluate(&self, expression: &str, context: &TemplateContext) -> Value {
        let mut stages = split_pipes(expression).into_iter();
        let path = stages.next().unwrap_or_default();
        let mut value = context.resolve(&path);

        for stage in stages {
            let (name, args) = parse_filter_call(&stage);
            value = self.filters.apply(&name, value, &args);
        }

        value
    }

    /// Resolve a reference such as `${data.pages}` or a bare `data.pages`
    /// to its raw value
    pub fn resolve_reference(&self, reference: &str, context: &TemplateContext) -> Value {
        let reference = reference.trim();
        let inner = reference
            .strip_prefix("${")
            .and_then(|r| r.strip_suffix('}'))
            .unwrap_or(reference);
        self.evaluate(inner, context)
    }
}

/// Split on `|` outside quotes, trimming each stage
fn split_pipes(expression: &str) -> Vec<String> {
    let mut stages = vec![];
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in expression.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == '|' => {
                stages.push(current.trim().to_string());
                current.clear();
            }
            None => current.push(c),
        }
    }
    stages.push(current.trim().to_string());
    stages
}

/// `name` or `name(arg, ...)`
fn parse_filter_call(stage: &str) -> (String, Vec<String>) {
    match FILTER_CALL_RE.captures(stage) {
        Some(caps) => (caps[1].to_string(), parse_args(&caps[2])),
        None => (stage.trim().to_string(), vec![]),
    }
}

/// Comma-separated arguments. Quoted arguments keep their content verbatim,
/// bare ones are trimmed, and a trailing empty argument is dropped.
fn parse_args(raw: &str) -> Vec<String> {
    let mut args = vec![];
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut quoted = false;

    let finish = |current: &str, quoted: bool| {
        if quoted {
            current.to_string()
        } else {
            current.trim().to_string()
        }
    };

    for c in raw.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                if current.trim().is_empty() {
                    current.clear();
                }
                quote = Some(c);
                quoted = true;
            }
            None if c == ',' => {
                args.push(finish(&current, quoted));
                current.clear();
                quoted = false;
            }
            None if quoted && c.is_whitespace() => {}
            None => current.push(c),
        }
    }

    if quoted || !current.trim().is_empty() {
        args.push(finish(&current, quoted));
    }
    args
}
