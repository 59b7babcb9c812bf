//! Markdown plan files: YAML front matter followed by phase and task sections.
//!
//! ~~~text
//! ---
//! config: { name: Docs, workers: 4 }
//! variables: { project: acme }
//! data_sources:
//!   pages: { type: inline, items: [{ route: "/" }] }
//! ---
//! # Phase name
//! **execution:** parallel
//! **depends_on:** none
//!
//! ## Task Template: template name
//! **foreach:** ${data.pages}
//! **task_id:** page-${item.route | slugify}
//! **outputs:**
//!   - name: doc
//!     path: ${config.output_dir}/${TASK_ID}.md
//! **requires:**
//!   - task: survey
//!     output: report
//!     as: survey_path
//!
//! ```prompt
//! Document ${item.route}.
//! ```
//! ~~~

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use anyhow::{Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::PlanConfig;
use crate::dag::{DataSource, Phase, Plan, TaskOutput, TaskRequirement, TaskTemplate};
use crate::error::PlanError;
use crate::template::filters::slugify;

static PHASE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+?)\s*$").unwrap());
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+Task(?:\s+Template)?:\s*(.+?)\s*$").unwrap());
static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*(\w+):\*\*\s*(.*?)\s*$").unwrap());

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    config: Option<PlanConfig>,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default)]
    data_sources: Option<BTreeMap<String, DataSource>>,
}

/// Parse a plan file; relative directories resolve against its parent
pub fn parse_plan_file(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let base_dir = base_dir
        .canonicalize()
        .unwrap_or_else(|_| base_dir.to_path_buf());

    let mut plan = parse_plan(&content, &base_dir)?;
    plan.source = Some(path.to_path_buf());
    Ok(plan)
}

/// Parse plan text
pub fn parse_plan(content: &str, base_dir: &Path) -> Result<Plan, PlanError> {
    let (front, body) = split_front_matter(content)?;
    let front: FrontMatter = if front.trim().is_empty() {
        FrontMatter::default()
    } else {
        serde_yaml::from_str(front)
            .map_err(|e| PlanError::Parse(format!("Invalid YAML front matter: {}", e)))?
    };

    let mut config = front.config.unwrap_or_default();
    config.resolve_paths(base_dir);

    let data_sources = front
        .data_sources
        .unwrap_or_default()
        .into_iter()
        .map(|(name, mut source)| {
            source.name = name.clone();
            (name, source)
        })
        .collect();

    Ok(Plan {
        name: config.name.clone(),
        config,
        variables: front.variables.unwrap_or_default(),
        data_sources,
        phases: parse_body(body)?,
        source: None,
    })
}

/// Split leading `---` delimited YAML from the body
fn split_front_matter(content: &str) -> Result<(&str, &str), PlanError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some(first_end) = content.find('\n') else {
        return Ok(("", content));
    };
    if content[..first_end].trim() != "---" {
        return Ok(("", content));
    }

    let rest = &content[first_end + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim() == "---" {
            return Ok((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }

    Err(PlanError::Parse("Unterminated front matter".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Outputs,
    Requires,
}

struct Fence {
    prompt: bool,
    lines: Vec<String>,
}

#[derive(Default)]
struct BodyParser {
    phases: Vec<Phase>,
    phase: Option<Phase>,
    template: Option<TaskTemplate>,
    has_task_id: bool,
    list: Option<(ListKind, Vec<String>)>,
    fence: Option<Fence>,
}

fn parse_body(body: &str) -> Result<Vec<Phase>, PlanError> {
    let mut parser = BodyParser::default();
    for line in body.lines() {
        parser.line(line)?;
    }
    parser.finish()
}

impl BodyParser {
    fn line(&mut self, line: &str) -> Result<(), PlanError> {
        let trimmed = line.trim_start();

        if let Some(fence) = self.fence.as_mut() {
            if trimmed.starts_with("```") {
                let fence = self.fence.take();
                self.close_fence(fence)?;
            } else {
                fence.lines.push(line.to_string());
            }
            return Ok(());
        }

        if self.list.is_some() {
            let continues = line.trim().is_empty()
                || line.starts_with(' ')
                || line.starts_with('\t')
                || trimmed.starts_with("- ");
            if continues && !trimmed.starts_with("```") {
                if let Some((_, lines)) = self.list.as_mut() {
                    lines.push(line.to_string());
                }
                return Ok(());
            }
            self.flush_list()?;
        }

        if let Some(info) = trimmed.strip_prefix("```") {
            self.fence = Some(Fence {
                prompt: info.trim() == "prompt",
                lines: vec![],
            });
            return Ok(());
        }

        if let Some(caps) = TASK_RE.captures(line) {
            self.finish_template()?;
            if self.phase.is_none() {
                return Err(PlanError::Parse(format!(
                    "Task '{}' is declared before any phase",
                    &caps[1]
                )));
            }
            self.template = Some(TaskTemplate::new(&caps[1], "", ""));
            self.has_task_id = false;
            return Ok(());
        }

        if let Some(caps) = PHASE_RE.captures(line) {
            self.finish_phase()?;
            self.phase = Some(Phase::new(&caps[1]));
            return Ok(());
        }

        if let Some(caps) = META_RE.captures(line) {
            let key = caps[1].to_lowercase();
            self.metadata(&key, &caps[2])?;
        }

        Ok(())
    }

    fn metadata(&mut self, key: &str, value: &str) -> Result<(), PlanError> {
        match (key, self.template.as_mut(), self.phase.as_mut()) {
            ("outputs", Some(_), _) => self.list = Some((ListKind::Outputs, inline_list(value))),
            ("requires", Some(_), _) => self.list = Some((ListKind::Requires, inline_list(value))),
            ("foreach", Some(template), _) => {
                template.foreach = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            ("task_id", Some(template), _) => {
                template.task_id = value.to_string();
                self.has_task_id = true;
            }
            ("execution", None, Some(phase)) => phase.execution = value.parse()?,
            ("depends_on", None, Some(phase)) => phase.depends_on = parse_depends_on(value),
            _ => tracing::debug!("Ignoring metadata '{}' outside its section", key),
        }
        Ok(())
    }

    fn close_fence(&mut self, fence: Option<Fence>) -> Result<(), PlanError> {
        let Some(fence) = fence else {
            return Ok(());
        };
        if !fence.prompt {
            return Ok(());
        }

        match self.template.as_mut() {
            Some(template) if template.prompt.is_empty() => {
                template.prompt = fence.lines.join("\n").trim().to_string();
            }
            Some(_) => {}
            None => tracing::debug!("Ignoring prompt block outside a task"),
        }
        Ok(())
    }

    fn flush_list(&mut self) -> Result<(), PlanError> {
        let Some((kind, lines)) = self.list.take() else {
            return Ok(());
        };
        let Some(template) = self.template.as_mut() else {
            return Ok(());
        };

        let yaml = lines.join("\n");
        match kind {
            ListKind::Outputs => template.outputs = parse_list::<TaskOutput>(&yaml, &template.name)?,
            ListKind::Requires => {
                template.requires = parse_list::<TaskRequirement>(&yaml, &template.name)?
            }
        }
        Ok(())
    }

    fn finish_template(&mut self) -> Result<(), PlanError> {
        self.flush_list()?;
        if let Some(mut template) = self.template.take() {
            if !self.has_task_id {
                template.task_id = slugify(&template.name);
            }
            if let Some(phase) = self.phase.as_mut() {
                phase.templates.push(template);
            }
        }
        Ok(())
    }

    fn finish_phase(&mut self) -> Result<(), PlanError> {
        self.finish_template()?;
        if let Some(phase) = self.phase.take() {
            self.phases.push(phase);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Phase>, PlanError> {
        if self.fence.is_some() {
            return Err(PlanError::Parse("Unterminated code block".to_string()));
        }
        self.finish_phase()?;
        Ok(self.phases)
    }
}

/// `**outputs:** [...]` written on the heading line itself
fn inline_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        vec![]
    } else {
        vec![value.to_string()]
    }
}

fn parse_list<T: DeserializeOwned>(yaml: &str, template: &str) -> Result<Vec<T>, PlanError> {
    if yaml.trim().is_empty() {
        return Ok(vec![]);
    }
    serde_yaml::from_str::<Option<Vec<T>>>(yaml)
        .map(Option::unwrap_or_default)
        .map_err(|e| PlanError::Parse(format!("Invalid list in task '{}': {}", template, e)))
}

fn parse_depends_on(value: &str) -> Vec<String> {
    if value.trim().eq_ignore_ascii_case("none") {
        return vec![];
    }
    value
        .split(',')
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string())
        .collect()
}
