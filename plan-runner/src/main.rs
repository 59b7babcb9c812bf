use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plan_runner::orchestrator::{RunOptions, RunSummary};
use plan_runner::{parse_plan_file, ClaudeRunner, Orchestrator};

#[derive(Parser)]
#[command(name = "plan-runner", version)]
#[command(about = "Execute plans defined in Markdown files via Claude CLI", long_about = None)]
struct Cli {
    /// Path to the Markdown plan file
    #[arg(required_unless_present = "check_cli")]
    plan_file: Option<PathBuf>,

    /// Resume from previous state (skip completed tasks)
    #[arg(long)]
    resume: bool,

    /// Parse and generate tasks without executing
    #[arg(long)]
    dry_run: bool,

    /// Override number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Execute only the specified phase
    #[arg(long)]
    phase: Option<String>,

    /// Custom path for the state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Claude CLI executable
    #[arg(long, default_value = "claude")]
    claude_path: PathBuf,

    /// Check if Claude CLI is available and exit
    #[arg(long)]
    check_cli: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "plan_runner=info".into())
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.check_cli {
        let runner = ClaudeRunner::new(PathBuf::from("."), "sonnet", std::time::Duration::from_secs(10))
            .with_claude_path(cli.claude_path.clone());
        return Ok(if runner.check_available().await {
            println!("Claude CLI is available");
            ExitCode::SUCCESS
        } else {
            println!("Claude CLI is not available");
            ExitCode::FAILURE
        });
    }

    let Some(plan_file) = cli.plan_file.as_deref() else {
        println!("Error: no plan file given");
        return Ok(ExitCode::FAILURE);
    };
    if !plan_file.exists() {
        println!("Error: Plan file not found: {}", plan_file.display());
        return Ok(ExitCode::FAILURE);
    }

    println!("Parsing plan: {}", plan_file.display());
    let mut plan = parse_plan_file(plan_file)?;

    if let Some(state_file) = &cli.state_file {
        let state_file = if state_file.is_relative() {
            std::env::current_dir()
                .context("Failed to read current directory")?
                .join(state_file)
        } else {
            state_file.clone()
        };
        plan.config = plan.config.with_state_file(state_file);
    }

    let runner = ClaudeRunner::new(
        plan.config.working_dir.clone(),
        plan.config.model.clone(),
        plan.config.task_timeout(),
    )
    .with_claude_path(cli.claude_path.clone());

    let orchestrator = Orchestrator::new(plan, Arc::new(runner));
    let options = RunOptions {
        resume: cli.resume,
        dry_run: cli.dry_run,
        phase: cli.phase.clone(),
        workers: cli.workers,
    };

    tokio::select! {
        result = orchestrator.execute(options) => {
            let summary = result?;
            if summary.dry_run {
                print_dry_run(&summary);
                return Ok(ExitCode::SUCCESS);
            }
            print_summary(&summary);
            Ok(if summary.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nExecution interrupted by user");
            println!("State saved to {}; re-run with --resume to continue", orchestrator.store().path().display());
            Ok(ExitCode::from(130))
        }
    }
}

fn print_dry_run(summary: &RunSummary) {
    println!("\n{}", "=".repeat(60));
    println!("DRY RUN SUMMARY: {}", summary.plan_name);
    println!("{}", "=".repeat(60));

    for phase in &summary.planned {
        let depends_on = if phase.depends_on.is_empty() {
            "none".to_string()
        } else {
            phase.depends_on.join(", ")
        };

        println!("\n{}:", phase.name);
        println!("  Execution:  {}", phase.execution.as_str());
        println!("  Depends on: {}", depends_on);
        println!("  Tasks:      {}", phase.task_ids.len());
        if !phase.task_ids.is_empty() {
            println!("  Task IDs:");
            for id in phase.task_ids.iter().take(5) {
                println!("    - {}", id);
            }
            if phase.task_ids.len() > 5 {
                println!("    ... and {} more", phase.task_ids.len() - 5);
            }
        }
    }

    println!("\nTotal tasks: {}", summary.total_tasks);
    println!("Dry run complete. No tasks were executed.");
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "=".repeat(60));
    println!("EXECUTION SUMMARY: {}", summary.plan_name);
    println!("{}", "=".repeat(60));

    for phase in &summary.phases {
        let status = if phase.failed == 0 { "✓" } else { "✗" };
        print!("  [{}] {}: {} completed, {} failed", status, phase.phase, phase.completed, phase.failed);
        if phase.already_completed > 0 {
            print!(" ({} already done)", phase.already_completed);
        }
        println!();
    }
    for skipped in &summary.skipped {
        println!("  [-] {}: skipped, dependency {} not completed", skipped.name, skipped.dependency);
    }

    println!("\nTotal tasks: {}", summary.stats.total);
    println!("Completed:   {}", summary.stats.completed);
    println!("Failed:      {}", summary.stats.failed);
    println!("Pending:     {}", summary.stats.pending + summary.stats.running);
    println!("Success:     {}", summary.success());

    if !summary.failed_tasks.is_empty() {
        println!("\nFailed tasks:");
        for (task_id, error) in &summary.failed_tasks {
            println!("  - {}: {}", task_id, error);
        }
    }
    if !summary.success() {
        println!("\nTo retry failed tasks, run with --resume");
    }
    println!("State file: {}", summary.state_file.display());
}
