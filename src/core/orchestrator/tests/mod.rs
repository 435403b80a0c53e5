
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::catalog::{Catalog, JobSpec};
use crate::core::orchestrator::executor::TaskExecutor;
use crate::core::orchestrator::types::{Outcome, Task};
use crate::core::orchestrator::ExpandOptions;

fn job(metrics: &[&str], table: &str, slugs: &str, ranges: &str) -> JobSpec {
    JobSpec {
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        table: table.to_string(),
        project_slugs: slugs.to_string(),
        time_ranges: ranges.to_string(),
        extra_params: BTreeMap::new(),
        extra_env: BTreeMap::new(),
        max_frequency: None,
    }
}

fn catalog(jobs: Vec<(&str, JobSpec)>) -> Catalog {
    Catalog {
        metrics: jobs
            .into_iter()
            .map(|(name, job)| (name.to_string(), job))
            .collect(),
    }
}

fn opts() -> ExpandOptions {
    ExpandOptions {
        conn: ":memory:".into(),
        ..Default::default()
    }
}

type Script = Box<dyn Fn(&Task, usize) -> Outcome + Send + Sync>;

/// Executor answering from a script of `(task, attempt)`; records every call.
struct ScriptedExecutor {
    script: Script,
    delay: Duration,
    calls: Mutex<HashMap<usize, usize>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(script: impl Fn(&Task, usize) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn succeeding() -> Self {
        Self::new(|_, _| Outcome::Success)
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self, index: usize) -> usize {
        self.calls.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task) -> Outcome {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(task.index).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        (self.script)(task, attempt)
    }
}
