use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Outcome of one delegated execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub error_message: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl RunOutput {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Failure that never reached a process exit status
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: -1,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Error text for the state ledger
    pub fn error_text(&self) -> String {
        match &self.error_message {
            Some(message) if !message.trim().is_empty() => message.trim().to_string(),
            _ => format!("Exit code: {}", self.exit_code),
        }
    }
}

/// Executes one prompt. Implementations must be safe to call from many
/// tasks at once.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, prompt: &str, task_id: &str) -> RunOutput;
}

#[derive(Debug, Deserialize)]
struct ClaudeJson {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Runs prompts through the `claude` CLI in print mode
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    claude_path: PathBuf,
    working_dir: PathBuf,
    model: String,
    timeout: Duration,
}

impl ClaudeRunner {
    pub fn new(working_dir: PathBuf, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            claude_path: PathBuf::from("claude"),
            working_dir,
            model: model.into(),
            timeout,
        }
    }

    pub fn with_claude_path(mut self, path: PathBuf) -> Self {
        self.claude_path = path;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.claude_path);
        cmd.current_dir(&self.working_dir)
            .arg("--print")
            .arg("--model")
            .arg(&self.model)
            .arg("--dangerously-skip-permissions")
            .arg("--output-format")
            .arg("json")
            .env("CLAUDE_CODE_ENTRYPOINT", "plan-runner")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(&self, prompt: &str) -> std::io::Result<std::process::Output> {
        tokio::fs::create_dir_all(&self.working_dir).await?;

        let mut child = self.command().spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        child.wait_with_output().await
    }

    /// `claude --version` exits successfully within ten seconds
    pub async fn check_available(&self) -> bool {
        let status = Command::new(&self.claude_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        matches!(
            tokio::time::timeout(Duration::from_secs(10), status).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

/// Map a finished process to a run output, reading the JSON body on success
pub fn parse_output(output: &std::process::Output) -> RunOutput {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        let error_message = Some(stderr.trim().to_string()).filter(|s| !s.is_empty());
        return RunOutput {
            success: false,
            exit_code,
            stdout,
            stderr,
            error_message,
            input_tokens: None,
            output_tokens: None,
        };
    }

    let (content, usage) = match serde_json::from_str::<ClaudeJson>(&stdout) {
        Ok(body) => (body.result.unwrap_or_else(|| stdout.clone()), body.usage),
        Err(_) => (stdout.clone(), None),
    };

    RunOutput {
        success: true,
        exit_code,
        stdout: content,
        stderr,
        error_message: None,
        input_tokens: usage.as_ref().and_then(|u| u.input_tokens),
        output_tokens: usage.as_ref().and_then(|u| u.output_tokens),
    }
}

#[async_trait]
impl TaskRunner for ClaudeRunner {
    async fn run(&self, prompt: &str, task_id: &str) -> RunOutput {
        tracing::debug!(
            "Running claude for {} in {} (model {})",
            task_id,
            self.working_dir.display(),
            self.model
        );

        match tokio::time::timeout(self.timeout, self.execute(prompt)).await {
            Err(_) => RunOutput::failed(format!(
                "Task timed out after {} seconds",
                self.timeout.as_secs()
            )),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => RunOutput::failed(format!(
                "Claude CLI not found. Ensure '{}' is in PATH.",
                self.claude_path.display()
            )),
            Ok(Err(e)) => RunOutput::failed(format!("Unexpected error: {}", e)),
            Ok(Ok(output)) => {
                let result = parse_output(&output);
                if !result.stderr.trim().is_empty() {
                    tracing::warn!("claude stderr for {}: {}", task_id, result.stderr.trim());
                }
                result
            }
        }
    }
}
