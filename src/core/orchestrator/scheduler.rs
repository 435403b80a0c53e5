//! Bounded-concurrency dispatch of expanded tasks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::config::SyncConfig;
use crate::core::error::{CalcError, Result};
use crate::core::orchestrator::executor::TaskExecutor;
use crate::core::orchestrator::types::{Outcome, RunSummary, Task, TaskGroupKey, TaskState};
use crate::core::store::Store;

const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    /// Extra attempts after a retryable failure.
    pub retry: usize,
    pub heartbeat: Option<Duration>,
    pub dry_run: bool,
    pub shuffle: bool,
}

impl From<&SyncConfig> for SchedulerSettings {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            workers: cfg.worker_count(),
            retry: cfg.retry,
            heartbeat: cfg.heartbeat,
            dry_run: cfg.dry_run,
            shuffle: cfg.shuffle,
        }
    }
}

/// Pending task indices per group.
#[derive(Debug, Default)]
pub struct GroupTracker {
    pending: HashMap<TaskGroupKey, HashSet<usize>>,
}

impl GroupTracker {
    pub fn new(tasks: &[Task]) -> Self {
        let mut pending: HashMap<TaskGroupKey, HashSet<usize>> = HashMap::new();
        for task in tasks {
            pending.entry(task.group()).or_default().insert(task.index);
        }
        Self { pending }
    }

    /// Removes a succeeded task; returns its group when that was the last pending task.
    /// The group entry is dropped at that point, so each group is returned at most once.
    pub fn complete(&mut self, task: &Task) -> Option<TaskGroupKey> {
        let group = task.group();
        let remaining = self.pending.get_mut(&group)?;
        remaining.remove(&task.index);
        if remaining.is_empty() {
            self.pending.remove(&group);
            Some(group)
        } else {
            None
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }
}

/// State shared by workers, the heartbeat and the signal handler.
#[derive(Debug, Default)]
pub struct RunState {
    /// Tasks that started and did not succeed yet; failed tasks stay listed.
    pub processing: BTreeMap<usize, (TaskState, Task)>,
    pub groups: GroupTracker,
}

pub struct Scheduler {
    store: Store,
    executor: Arc<dyn TaskExecutor>,
    settings: SchedulerSettings,
    state: Arc<Mutex<RunState>>,
}

impl Scheduler {
    pub fn new(store: Store, executor: Arc<dyn TaskExecutor>, settings: SchedulerSettings) -> Self {
        Self {
            store,
            executor,
            settings,
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Arc<Mutex<RunState>> {
        self.state.clone()
    }

    pub async fn run(&self, mut tasks: Vec<Task>) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary {
            total: tasks.len(),
            ..Default::default()
        };
        {
            let mut state = self.state.lock().await;
            state.groups = GroupTracker::new(&tasks);
            state.processing.clear();
        }
        if self.settings.shuffle {
            tasks.shuffle(&mut rand::thread_rng());
        }
        if self.settings.dry_run {
            info!("running in dry-run mode");
        }

        let heartbeat = self
            .settings
            .heartbeat
            .map(|every| spawn_heartbeat(self.state.clone(), every));
        let signals = spawn_signal_dump(self.state.clone());

        let workers = self.settings.workers.max(1);
        info!("dispatching {} tasks to {} workers", tasks.len(), workers);
        let permits = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        let total = tasks.len();
        for (i, task) in tasks.into_iter().enumerate() {
            if i > 0 && i % PROGRESS_EVERY == 0 {
                info!("on {}/{} task", i, total);
            }
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CalcError::data(format!("worker pool closed: {}", e)))?;
            let worker = Worker {
                store: self.store.clone(),
                executor: self.executor.clone(),
                state: self.state.clone(),
                retry: self.settings.retry,
                dry_run: self.settings.dry_run,
            };
            set.spawn(async move {
                let report = worker.process(task).await;
                drop(permit);
                report
            });
            while let Some(res) = set.try_join_next() {
                tally(&mut summary, res);
            }
        }
        debug!("waiting for {} running tasks", set.len());
        while let Some(res) = set.join_next().await {
            tally(&mut summary, res);
        }

        if let Some(handle) = heartbeat {
            handle.abort();
        }
        if let Some(handle) = signals {
            handle.abort();
        }
        let unfinished = self.state.lock().await.groups.pending_groups();
        if unfinished > 0 {
            warn!("{} task groups were not completed in this run", unfinished);
        }
        info!("{} in {:?}", summary, started.elapsed());
        Ok(summary)
    }
}

struct Report {
    outcome: Outcome,
    group_completed: bool,
}

fn tally(summary: &mut RunSummary, res: std::result::Result<Report, tokio::task::JoinError>) {
    match res {
        Ok(report) => {
            summary.record(&report.outcome);
            if report.group_completed {
                summary.groups_completed += 1;
            }
        }
        Err(e) => {
            error!("task worker crashed: {}", e);
            summary.failed += 1;
        }
    }
}

struct Worker {
    store: Store,
    executor: Arc<dyn TaskExecutor>,
    state: Arc<Mutex<RunState>>,
    retry: usize,
    dry_run: bool,
}

impl Worker {
    async fn process(self, task: Task) -> Report {
        let idx = task.index;
        self.state
            .lock()
            .await
            .processing
            .insert(idx, (TaskState::Running, task.clone()));
        debug!("starting task #{}, details:\n{}", idx, task.pretty());

        let started = Instant::now();
        let outcome = if self.dry_run {
            Outcome::Success
        } else {
            self.execute_with_retry(&task).await
        };
        let took = started.elapsed();

        if let Outcome::Failed { reason, .. } = &outcome {
            if let Some(entry) = self.state.lock().await.processing.get_mut(&idx) {
                entry.0 = TaskState::Failed;
            }
            error!(
                "task #{} failed (took {:?}), so not marking it as done: {}\n{}",
                idx,
                took,
                reason,
                task.pretty()
            );
            return Report {
                outcome,
                group_completed: false,
            };
        }

        info!(
            "task #{} finished in {:?} (skipped or no data: {}), details:\n{}",
            idx,
            took,
            outcome == Outcome::Skipped,
            task.pretty()
        );
        let finished_group = {
            let mut state = self.state.lock().await;
            state.processing.remove(&idx);
            state.groups.complete(&task)
        };
        let group_completed = match finished_group {
            Some(group) => self.mark_done(&group).await,
            None => false,
        };
        Report {
            outcome,
            group_completed,
        }
    }

    async fn execute_with_retry(&self, task: &Task) -> Outcome {
        let mut attempt = 0;
        loop {
            match self.executor.execute(task).await {
                Outcome::Failed {
                    reason,
                    retryable: true,
                } if attempt < self.retry => {
                    attempt += 1;
                    warn!(
                        "retry #{} for task #{} after: {}\n{}",
                        attempt,
                        task.index,
                        reason,
                        task.pretty()
                    );
                }
                outcome => break outcome,
            }
        }
    }

    async fn mark_done(&self, group: &TaskGroupKey) -> bool {
        if self.dry_run {
            info!("task group '{}' done (dry-run, not recorded)", group);
            return true;
        }
        match self.store.mark_done(&group.to_string()).await {
            Ok(()) => {
                info!("task group '{}' done", group);
                true
            }
            Err(e) => {
                error!("cannot mark task group '{}' as done: {}", group, e);
                false
            }
        }
    }
}

pub async fn dump_processing(state: &Mutex<RunState>, reason: &str) {
    let state = state.lock().await;
    info!("{}: {} tasks processing", reason, state.processing.len());
    for (idx, (task_state, task)) in &state.processing {
        info!("{} task #{}\n{}", task_state.as_str(), idx, task.pretty());
    }
    info!("{} ends", reason);
}

fn spawn_heartbeat(state: Arc<Mutex<RunState>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            dump_processing(&state, "heartbeat").await;
        }
    })
}

#[cfg(unix)]
fn spawn_signal_dump(state: Arc<Mutex<RunState>>) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::user_defined1()) {
        Ok(mut sigusr1) => Some(tokio::spawn(async move {
            while sigusr1.recv().await.is_some() {
                dump_processing(&state, "signal(SIGUSR1)").await;
            }
        })),
        Err(e) => {
            warn!("cannot listen for SIGUSR1: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn spawn_signal_dump(_state: Arc<Mutex<RunState>>) -> Option<JoinHandle<()>> {
    None
}
