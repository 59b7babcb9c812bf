//! Plan files on disk: parsing, data files and dry runs

mod common;

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use common::ScriptedRunner;
use plan_runner::orchestrator::RunOptions;
use plan_runner::{parse_plan_file, ExecutionMode, Orchestrator};

const PLAN: &str = r#"---
config:
  name: Site Docs
  workers: 3
  retries: 1
  retry_delay: 0
  output_dir: ./out
variables:
  project: acme
data_sources:
  pages:
    type: file
    file: data/pages.json
---

# Survey
**execution:** sequential

## Task: survey
**task_id:** survey
**outputs:**
  - name: report
    path: ${config.output_dir}/survey.md

```prompt
Survey ${project | upper}.
```

```markdown
# Example heading inside a fence
```

# Pages
**depends_on:** Survey

## Task Template: page
**foreach:** ${data.pages}
**task_id:** page-${item.route | slugify}
**outputs:**
  - name: doc
    path: ${config.output_dir}/pages/${TASK_ID}.md
**requires:**
  - task: survey
    output: report
    as: survey

```prompt
Document ${item.title | default("untitled")} at ${item.route}.
Context: ${requires.survey}
```
"#;

fn write_plan(tmp: &TempDir, pages: &str) -> std::path::PathBuf {
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(tmp.path().join("data/pages.json"), pages).unwrap();
    let path = tmp.path().join("plan.md");
    fs::write(&path, PLAN).unwrap();
    path
}

#[test]
fn test_parse_plan_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_plan(&tmp, "[]");

    let plan = parse_plan_file(&path).unwrap();
    let base = tmp.path().canonicalize().unwrap();

    assert_eq!(plan.name, "Site Docs");
    assert_eq!(plan.config.workers, 3);
    assert_eq!(plan.config.output_dir, base.join("out"));
    assert_eq!(plan.config.working_dir, base);
    assert_eq!(plan.config.state_path(), base.join("out").join("state.json"));
    assert_eq!(plan.source.as_deref(), Some(path.as_path()));

    let names: Vec<_> = plan.phases.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Survey", "Pages"]);
    assert_eq!(plan.phases[0].execution, ExecutionMode::Sequential);
    assert_eq!(plan.phases[1].execution, ExecutionMode::Parallel);
    assert_eq!(plan.phases[1].depends_on, vec!["Survey"]);
    assert_eq!(plan.phases[1].templates[0].requires[0].alias, "survey");
}

#[test]
fn test_missing_plan_file() {
    let tmp = TempDir::new().unwrap();
    let err = parse_plan_file(&tmp.path().join("absent.md")).unwrap_err();
    assert!(err.to_string().contains("Failed to read plan file"));
}

#[tokio::test]
async fn test_dry_run_from_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_plan(
        &tmp,
        r#"{"items": [{"route": "/"}, {"route": "/About Us/", "title": "About"}, {"route": "/blog"}]}"#,
    );

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(parse_plan_file(&path).unwrap(), runner.clone());
    let summary = orchestrator
        .execute(RunOptions { dry_run: true, ..Default::default() })
        .await
        .unwrap();

    assert_eq!(summary.total_tasks, 4);
    assert_eq!(summary.planned[1].task_ids, vec!["page-index", "page-about-us", "page-blog"]);
    assert!(runner.task_ids().is_empty());
    assert!(!orchestrator.store().path().exists());
}

#[tokio::test]
async fn test_run_from_file() {
    let tmp = TempDir::new().unwrap();
    let path = write_plan(&tmp, r#"[{"route": "/About Us/", "title": "About"}, {"route": "/blog"}]"#);

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(parse_plan_file(&path).unwrap(), runner.clone());
    let summary = orchestrator.execute(RunOptions::default()).await.unwrap();

    assert!(summary.success());
    assert_eq!(runner.task_ids()[0], "survey");
    assert_eq!(runner.calls_for("survey")[0].prompt, "Survey ACME.");

    let about = &runner.calls_for("page-about-us")[0].prompt;
    assert!(about.starts_with("Document About at /About Us/."));
    assert!(about.contains("/out/survey.md"));

    let blog = &runner.calls_for("page-blog")[0].prompt;
    assert!(blog.starts_with("Document untitled at /blog."));

    let phase_names: Vec<_> = summary.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(phase_names, vec!["Survey", "Pages"]);
    assert!(orchestrator.store().path().exists());
}
