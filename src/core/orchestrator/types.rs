use std::fmt;

use crate::core::config::{ENV_PREFIX, EnvMap};
use crate::core::error::CalcError;
use crate::core::timerange::TimeRange;

/// Identity of a task-group: every task computing one metric of one job into one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskGroupKey {
    pub job: String,
    pub table: String,
    pub metric: String,
}

impl fmt::Display for TaskGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.job, self.table, self.metric)
    }
}

/// One (metric, project, range) computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub index: usize,
    pub job: String,
    pub metric: String,
    pub table: String,
    pub slug: String,
    pub range: TimeRange,
    /// Complete prefix-stripped settings handed to the materializer.
    pub env: EnvMap,
}

impl Task {
    pub fn group(&self) -> TaskGroupKey {
        TaskGroupKey {
            job: self.job.clone(),
            table: self.table.clone(),
            metric: self.metric.clone(),
        }
    }

    /// Multi-line dump with sorted settings, used by diagnostics and failure logs.
    pub fn pretty(&self) -> String {
        let mut msg = format!("#{}: {}\n", self.index, self.group());
        for (k, v) in self.env.iter() {
            msg.push_str(&format!("#{}:\t{}{}: {}\n", self.index, ENV_PREFIX, k, v));
        }
        msg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Failed => "failed",
        }
    }
}

/// Result of executing a task once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Nothing to do: the window was already computed.
    Skipped,
    Failed { reason: String, retryable: bool },
}

impl Outcome {
    pub fn failed(err: &CalcError) -> Self {
        Outcome::Failed {
            reason: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Counters reported at the end of a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub groups_completed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tasks: {} succeeded, {} skipped, {} failed; {} task groups completed",
            self.total, self.succeeded, self.skipped, self.failed, self.groups_completed
        )
    }
}
