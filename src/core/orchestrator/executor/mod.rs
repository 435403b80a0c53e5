//! Task execution transports.
//!
//! - [process]: spawns the `calc` subcommand with the task's settings in its environment
//! - [in_process]: runs the materializer on the orchestrator's own store handle

mod in_process;
mod process;

use std::sync::Arc;

use async_trait::async_trait;

pub use in_process::InProcessExecutor;
pub use process::ProcessExecutor;

use crate::core::config::{ExecutorKind, SyncConfig};
use crate::core::error::Result;
use crate::core::orchestrator::types::{Outcome, Task};
use crate::core::store::Store;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs the task once. Never panics on task failure; failures are reported in the outcome.
    async fn execute(&self, task: &Task) -> Outcome;
}

pub fn build(cfg: &SyncConfig, store: &Store) -> Result<Arc<dyn TaskExecutor>> {
    Ok(match cfg.executor {
        ExecutorKind::Process => Arc::new(ProcessExecutor::new(cfg.bin_path.clone())?),
        ExecutorKind::InProcess => Arc::new(InProcessExecutor::new(store.clone())),
    })
}
