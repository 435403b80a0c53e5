//! Sync orchestration: expands the catalog into tasks and executes them.
//!
//! Control flow per run:
//! - [expander]: catalog -> flat task list, pruned by the frequency gate
//! - [scheduler]: bounded worker pool, retries, group completion, diagnostics
//! - [executor]: how a single task actually runs (child process or in-process)

pub mod executor;
pub mod expander;
pub mod scheduler;
pub mod types;

use std::time::Instant;

use tracing::info;

pub use expander::{ExpandOptions, Expander};
pub use scheduler::{Scheduler, SchedulerSettings};
pub use types::{Outcome, RunSummary, Task, TaskGroupKey};

use crate::core::catalog::Catalog;
use crate::core::config::SyncConfig;
use crate::core::error::Result;
use crate::core::store::Store;

/// One full sync run. Catalog and connectivity problems abort before any task runs;
/// task failures are only reflected in the summary.
pub async fn run_sync(cfg: &SyncConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let store = Store::open(&cfg.conn)?;
    let catalog = Catalog::load(&cfg.catalog_path).await?;

    let mut expander = Expander::new(store.clone());
    let tasks = expander.expand(&catalog, &ExpandOptions::from(cfg)).await?;

    let executor = executor::build(cfg, &store)?;
    let scheduler = Scheduler::new(store, executor, SchedulerSettings::from(cfg));
    let summary = scheduler.run(tasks).await?;
    info!("sync took {:?}", started.elapsed());
    Ok(summary)
}

#[cfg(test)]
mod tests;
