use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::TaskExecutor;
use crate::core::config::ENV_PREFIX;
use crate::core::error::{CalcError, EXIT_PERMANENT, EXIT_SKIPPED, Result};
use crate::core::orchestrator::types::{Outcome, Task};

/// Runs each task as `<program> calc` with the task's settings as `V3_*` variables.
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    /// Defaults to the running binary when no path is configured.
    pub fn new(program: Option<PathBuf>) -> Result<Self> {
        let program = match program {
            Some(path) => path,
            None => std::env::current_exe().map_err(|e| {
                CalcError::config(format!("cannot locate the calc binary: {}", e))
            })?,
        };
        Ok(Self { program })
    }

    fn command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("calc");
        // Only the task's own settings reach the child.
        for (key, _) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                cmd.env_remove(key);
            }
        }
        cmd.envs(task.env.to_prefixed());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Maps a `calc` exit code onto an outcome; `None` means killed by a signal.
pub fn outcome_for_exit(code: Option<i32>, output: &str) -> Outcome {
    match code {
        Some(0) => Outcome::Success,
        Some(EXIT_SKIPPED) => Outcome::Skipped,
        Some(code) => Outcome::Failed {
            reason: format!("exit code {}: {}", code, output),
            retryable: code != EXIT_PERMANENT,
        },
        None => Outcome::Failed {
            reason: format!("terminated by signal: {}", output),
            retryable: true,
        },
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute(&self, task: &Task) -> Outcome {
        let started = Instant::now();
        debug!(
            "{} calc (task #{}, {})",
            self.program.display(),
            task.index,
            task.group()
        );
        let output = match self.command(task).output().await {
            Ok(output) => output,
            Err(e) => {
                return Outcome::Failed {
                    reason: format!("cannot start {}: {}", self.program.display(), e),
                    retryable: false,
                };
            }
        };
        let captured = format!(
            "stdout:\n{}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        debug!(
            "task #{} exited with {:?} after {:?}\n{}",
            task.index,
            output.status.code(),
            started.elapsed(),
            captured
        );
        outcome_for_exit(output.status.code(), &captured)
    }
}
