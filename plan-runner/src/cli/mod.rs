mod runner;

pub use runner::{parse_output, ClaudeRunner, RunOutput, TaskRunner};
