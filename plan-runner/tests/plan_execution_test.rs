//! End-to-end runs of the orchestrator against a scripted runner

mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use serde_json::{json, Value};
use tempfile::TempDir;

use common::ScriptedRunner;
use plan_runner::dag::DataSource;
use plan_runner::orchestrator::RunOptions;
use plan_runner::{Orchestrator, Phase, Plan, PlanBuilder, PlanConfig, PlanError, Status, TaskTemplate};

fn config(tmp: &TempDir) -> PlanConfig {
    PlanConfig {
        name: "Integration".to_string(),
        retries: 1,
        retry_delay: 0.0,
        working_dir: tmp.path().to_path_buf(),
        output_dir: tmp.path().join("out"),
        ..Default::default()
    }
}

fn pages(n: usize) -> DataSource {
    DataSource::inline(
        "pages",
        (0..n).map(|i| json!({"route": format!("/page-{}", i)})).collect(),
    )
}

fn two_task_plan(config: PlanConfig) -> Plan {
    PlanBuilder::new("Integration")
        .config(config)
        .phase(
            Phase::new("build")
                .template(TaskTemplate::new("a", "a", "Build a").with_output("report", "${config.output_dir}/a.md"))
                .template(TaskTemplate::new("b", "b", "Build b")),
        )
        .phase(Phase::new("ship").depends_on("build").template(TaskTemplate::new("ship", "ship", "Ship")))
        .build()
        .unwrap()
}

fn read_state(orchestrator: &Orchestrator) -> Value {
    let json = fs::read_to_string(orchestrator.store().path()).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_doubles() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp);
    config.retries = 3;
    config.retry_delay = 5.0;

    let plan = PlanBuilder::new("Backoff")
        .config(config)
        .phase(Phase::new("only").template(TaskTemplate::new("flaky", "flaky", "Try")))
        .build()
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new().failing("flaky", 2));
    let orchestrator = Orchestrator::new(plan, runner.clone());
    let summary = orchestrator.execute(RunOptions::default()).await.unwrap();

    assert!(summary.success());
    let calls = runner.calls_for("flaky");
    assert_eq!(calls.len(), 3);

    let first_gap = calls[1].at - calls[0].at;
    let second_gap = calls[2].at - calls[1].at;
    assert!(first_gap >= Duration::from_secs(5) && first_gap < Duration::from_secs(6));
    assert!(second_gap >= Duration::from_secs(10) && second_gap < Duration::from_secs(11));
    assert_eq!(orchestrator.store().task_attempts("flaky"), 3);
}

#[tokio::test]
async fn test_exhausted_retries_record_last_error() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp);
    config.retries = 2;

    let runner = Arc::new(ScriptedRunner::new().failing("b", 5));
    let orchestrator = Orchestrator::new(two_task_plan(config), runner.clone());
    let summary = orchestrator.execute(RunOptions::default()).await.unwrap();

    assert!(!summary.success());
    assert_eq!(runner.calls_for("b").len(), 2);
    assert_eq!(summary.failed_tasks, vec![("b".to_string(), "b failed".to_string())]);

    let state = read_state(&orchestrator);
    assert_eq!(state["tasks"]["b"]["status"], "failed");
    assert_eq!(state["tasks"]["b"]["attempts"], 2);
    assert_eq!(state["tasks"]["b"]["error_message"], "b failed");
    assert_eq!(state["tasks"]["b"]["outputs"], json!({}));
    assert_eq!(state["phases"]["build"]["status"], "failed");
    assert_eq!(state["phases"]["ship"]["status"], "skipped");
    assert_eq!(state["tasks"]["ship"]["status"], "pending");
}

#[tokio::test]
async fn test_resume_skips_completed_tasks() {
    let tmp = TempDir::new().unwrap();

    let first = Arc::new(ScriptedRunner::new().failing("b", 1));
    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), first.clone());
    let summary = orchestrator.execute(RunOptions::default()).await.unwrap();
    assert!(!summary.success());
    assert_eq!(summary.skipped.len(), 1);

    let second = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), second.clone());
    let summary = orchestrator
        .execute(RunOptions { resume: true, ..Default::default() })
        .await
        .unwrap();

    assert!(summary.success());
    assert_eq!(second.task_ids(), vec!["b", "ship"]);
    assert_eq!(summary.phases[0].already_completed, 1);

    let store = orchestrator.store();
    assert_eq!(store.task_attempts("a"), 1);
    assert_eq!(store.task_attempts("b"), 2);
    assert_eq!(store.phase_status("ship"), Some(Status::Completed));
    assert!(store.snapshot().unwrap().completed_at.is_some());
}

#[tokio::test]
async fn test_resume_after_data_set_shrinks() {
    let tmp = TempDir::new().unwrap();
    let plan = |n: usize| {
        PlanBuilder::new("Shrink")
            .config(config(&tmp))
            .data_source(pages(n))
            .phase(Phase::new("specs").template(
                TaskTemplate::new("spec", "spec-${item.route | slugify}", "Write").with_foreach("${data.pages}"),
            ))
            .phase(Phase::new("ship").depends_on("specs").template(TaskTemplate::new("ship", "ship", "Ship")))
            .build()
            .unwrap()
    };

    let first = Arc::new(ScriptedRunner::new().failing("spec-page-2", 1));
    let orchestrator = Orchestrator::new(plan(3), first);
    let summary = orchestrator.execute(RunOptions::default()).await.unwrap();
    assert!(!summary.success());
    assert_eq!(summary.skipped.len(), 1);

    let second = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(plan(2), second.clone());
    let summary = orchestrator
        .execute(RunOptions { resume: true, ..Default::default() })
        .await
        .unwrap();

    assert!(summary.success(), "{:?}", summary.skipped);
    assert_eq!(second.task_ids(), vec!["ship"]);
    assert!(summary.failed_tasks.is_empty());
    assert_eq!(summary.stats.total, 3);
    assert_eq!(summary.stats.completed, 3);
    assert!(read_state(&orchestrator)["tasks"].get("spec-page-2").is_none());
}

#[tokio::test]
async fn test_worker_override_replaces_invalid_config() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp);
    config.workers = 0;

    let plan = PlanBuilder::new("Override")
        .config(config)
        .phase(Phase::new("only").template(TaskTemplate::new("a", "a", "Run")))
        .build_unchecked();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(plan.clone(), runner.clone());
    let summary = orchestrator
        .execute(RunOptions { workers: Some(2), ..Default::default() })
        .await
        .unwrap();
    assert!(summary.success());
    assert_eq!(runner.task_ids(), vec!["a"]);

    let orchestrator = Orchestrator::new(plan, Arc::new(ScriptedRunner::new()));
    let err = orchestrator.execute(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PlanError>(), Some(PlanError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_fresh_run_ignores_previous_state() {
    let tmp = TempDir::new().unwrap();

    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), Arc::new(ScriptedRunner::new()));
    orchestrator.execute(RunOptions::default()).await.unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), runner.clone());
    orchestrator.execute(RunOptions::default()).await.unwrap();

    assert_eq!(runner.task_ids().len(), 3);
    assert_eq!(orchestrator.store().task_attempts("a"), 1);
}

#[tokio::test]
async fn test_corrupt_state_starts_fresh() {
    let tmp = TempDir::new().unwrap();
    let config = config(&tmp);
    fs::create_dir_all(&config.output_dir).unwrap();
    fs::write(config.state_path(), "{ not json").unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(two_task_plan(config), runner.clone());
    let summary = orchestrator
        .execute(RunOptions { resume: true, ..Default::default() })
        .await
        .unwrap();

    assert!(summary.success());
    assert_eq!(runner.task_ids().len(), 3);
    assert_eq!(read_state(&orchestrator)["tasks"]["a"]["status"], "completed");
}

#[tokio::test]
async fn test_cycle_fails_before_any_task() {
    let tmp = TempDir::new().unwrap();
    let plan = PlanBuilder::new("Cycle")
        .config(config(&tmp))
        .phase(Phase::new("a").depends_on("b").template(TaskTemplate::new("a", "a", "")))
        .phase(Phase::new("b").depends_on("a").template(TaskTemplate::new("b", "b", "")))
        .build_unchecked();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(plan, runner.clone());
    let err = orchestrator.execute(RunOptions::default()).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<PlanError>(), Some(PlanError::PhaseCycle { .. })));
    assert!(runner.task_ids().is_empty());
    assert!(!orchestrator.store().path().exists());
}

#[tokio::test]
async fn test_requirements_resolve_after_dependency() {
    let tmp = TempDir::new().unwrap();
    let plan = PlanBuilder::new("Requires")
        .config(config(&tmp))
        .data_source(pages(2))
        .phase(Phase::new("survey").template(
            TaskTemplate::new("survey", "survey", "Survey")
                .with_output("report", "${config.output_dir}/survey.md"),
        ))
        .phase(Phase::new("specs").depends_on("survey").template(
            TaskTemplate::new("spec", "spec-${item.route | slugify}", "Use ${requires.report}")
                .with_foreach("${data.pages}")
                .with_requirement("survey", "report", "report"),
        ))
        .build()
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(plan, runner.clone());
    orchestrator.execute(RunOptions::default()).await.unwrap();

    let calls = runner.calls_for("spec-page-1");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prompt.ends_with("/out/survey.md"), "{}", calls[0].prompt);
    assert!(!calls[0].prompt.contains("[pending:"));

    let state = read_state(&orchestrator);
    assert!(state["tasks"]["survey"]["outputs"]["report"]
        .as_str()
        .unwrap()
        .ends_with("/out/survey.md"));
}

#[tokio::test]
async fn test_parallel_phase_respects_worker_limit() {
    let tmp = TempDir::new().unwrap();
    let plan = PlanBuilder::new("Parallel")
        .config(config(&tmp))
        .data_source(pages(6))
        .phase(Phase::new("specs").template(
            TaskTemplate::new("spec", "spec-${item.route | slugify}", "Write").with_foreach("${data.pages}"),
        ))
        .build()
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(20)));
    let orchestrator = Orchestrator::new(plan, runner.clone());
    let summary = orchestrator
        .execute(RunOptions { workers: Some(2), ..Default::default() })
        .await
        .unwrap();

    assert_eq!(summary.stats.completed, 6);
    assert_eq!(runner.max_active.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sequential_phase_runs_in_order() {
    let tmp = TempDir::new().unwrap();
    let plan = PlanBuilder::new("Sequential")
        .config(config(&tmp))
        .data_source(pages(3))
        .phase(Phase::new("specs").sequential().template(
            TaskTemplate::new("spec", "spec-${item.route | slugify}", "Write").with_foreach("${data.pages}"),
        ))
        .build()
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(5)));
    let orchestrator = Orchestrator::new(plan, runner.clone());
    orchestrator.execute(RunOptions::default()).await.unwrap();

    assert_eq!(runner.task_ids(), vec!["spec-page-0", "spec-page-1", "spec-page-2"]);
    assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_phase_filter_runs_one_phase() {
    let tmp = TempDir::new().unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), runner.clone());
    orchestrator
        .execute(RunOptions { phase: Some("build".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(runner.task_ids().len(), 2);
    assert_eq!(orchestrator.store().phase_status("ship"), Some(Status::Pending));

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(two_task_plan(config(&tmp)), runner.clone());
    let summary = orchestrator
        .execute(RunOptions { resume: true, phase: Some("ship".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(summary.success());
    assert_eq!(runner.task_ids(), vec!["ship"]);
}

#[tokio::test]
async fn test_duplicate_task_ids_abort() {
    let tmp = TempDir::new().unwrap();
    let plan = PlanBuilder::new("Duplicates")
        .config(config(&tmp))
        .data_source(DataSource::inline("pages", vec![json!({"route": "/About"}), json!({"route": "about"})]))
        .phase(Phase::new("specs").template(
            TaskTemplate::new("spec", "spec-${item.route | slugify}", "").with_foreach("${data.pages}"),
        ))
        .build()
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = Orchestrator::new(plan, runner.clone());
    let err = orchestrator.execute(RunOptions::default()).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::DuplicateTaskId { task_id, .. }) if task_id == "spec-about"
    ));
    assert!(runner.task_ids().is_empty());
}
