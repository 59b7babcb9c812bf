#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;

use plan_runner::{RunOutput, TaskRunner};

/// Records every invocation; a task fails for its first `n` calls when scripted
#[derive(Default)]
pub struct ScriptedRunner {
    failures: Mutex<HashMap<String, u32>>,
    pub calls: Mutex<Vec<Call>>,
    delay: Option<Duration>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub task_id: String,
    pub prompt: String,
    pub at: tokio::time::Instant,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, task_id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(task_id.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.task_id.clone()).collect()
    }

    pub fn calls_for(&self, task_id: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, prompt: &str, task_id: &str) -> RunOutput {
        self.calls.lock().unwrap().push(Call {
            task_id: task_id.to_string(),
            prompt: prompt.to_string(),
            at: tokio::time::Instant::now(),
        });

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(task_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if fail {
            RunOutput::failed(format!("{} failed", task_id)).with_exit_code(1)
        } else {
            RunOutput::succeeded(format!("{} done", task_id))
        }
    }
}
