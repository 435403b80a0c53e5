//! Catalog expansion into a flat task list.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::core::catalog::{Catalog, JobSpec, SlugSource, parse_ranges};
use crate::core::config::{EnvMap, SyncConfig};
use crate::core::error::{CalcError, Result};
use crate::core::orchestrator::types::{Task, TaskGroupKey};
use crate::core::store::Store;
use crate::core::timerange::TimeRange;

/// Run-wide settings that shape every job's tasks.
#[derive(Debug, Clone, Default)]
pub struct ExpandOptions {
    pub conn: String,
    /// Replaces every job's `project_slugs` when set.
    pub project_slugs: Option<String>,
    /// Replaces every job's `time_ranges` when set.
    pub time_ranges: Option<String>,
    /// Forwarded to every task ahead of the job's own settings.
    pub task_env: BTreeMap<String, String>,
}

impl From<&SyncConfig> for ExpandOptions {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            conn: cfg.conn.clone(),
            project_slugs: cfg.project_slugs.clone(),
            time_ranges: cfg.time_ranges.clone(),
            task_env: cfg.task_env.clone(),
        }
    }
}

pub struct Expander {
    store: Store,
    /// Discovery results keyed by trimmed query text, kept for the whole run.
    slug_cache: HashMap<String, Vec<String>>,
}

impl Expander {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            slug_cache: HashMap::new(),
        }
    }

    pub fn cached_queries(&self) -> usize {
        self.slug_cache.len()
    }

    /// Expands every job into tasks. Any invalid job fails the whole expansion.
    pub async fn expand(&mut self, catalog: &Catalog, opts: &ExpandOptions) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut seen = HashSet::new();
        for (name, job) in &catalog.metrics {
            let slug_source = opts.project_slugs.as_deref().unwrap_or(&job.project_slugs);
            let slug_source = SlugSource::parse(slug_source).map_err(|e| in_job(name, e))?;
            let range_source = opts.time_ranges.as_deref().unwrap_or(&job.time_ranges);
            let ranges = parse_ranges(range_source).map_err(|e| in_job(name, e))?;

            let metrics = self.runnable_metrics(name, job).await?;
            if metrics.is_empty() {
                info!("entry '{}' has nothing to run", name);
                continue;
            }
            let slugs = self
                .resolve_slugs(&slug_source)
                .await
                .map_err(|e| in_job(name, e))?;

            let base = job_env(job, opts);
            info!(
                "entry '{}' has {} metrics, {} project slugs, {} time ranges: {} tasks",
                name,
                metrics.len(),
                slugs.len(),
                ranges.len(),
                metrics.len() * slugs.len() * ranges.len()
            );
            for metric in &metrics {
                for slug in &slugs {
                    for range in &ranges {
                        let key = (
                            job.table.clone(),
                            range.as_code(),
                            slug.clone(),
                            metric.clone(),
                        );
                        if !seen.insert(key) {
                            warn!(
                                "'{}' already schedules {} for '{}' {} into '{}', skipping duplicate",
                                name, metric, slug, range, job.table
                            );
                            continue;
                        }
                        tasks.push(new_task(tasks.len(), name, job, metric, slug, *range, &base));
                    }
                }
            }
        }
        info!("{} tasks", tasks.len());
        for task in &tasks {
            debug!("task:\n{}", task.pretty());
        }
        Ok(tasks)
    }

    /// Job metrics minus those whose group synced more recently than `max_frequency`.
    async fn runnable_metrics(&self, name: &str, job: &JobSpec) -> Result<Vec<String>> {
        let metrics = dedup(job.metrics.iter().cloned());
        if metrics.is_empty() {
            return Err(CalcError::config(format!("entry '{}' has no metrics", name)));
        }
        if job.table.trim().is_empty() {
            return Err(CalcError::config(format!("entry '{}' has no table", name)));
        }
        let Some(freq) = job.max_frequency else {
            return Ok(metrics);
        };
        let mut runnable = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let group = TaskGroupKey {
                job: name.to_string(),
                table: job.table.clone(),
                metric: metric.clone(),
            };
            let check = self.store.check_frequency(&group.to_string(), freq).await?;
            if check.should_run {
                runnable.push(metric);
            } else {
                info!(
                    "skipping running '{}' due to frequency check: {:?}, last run: {:?}",
                    group, freq, check.last_sync
                );
            }
        }
        Ok(runnable)
    }

    async fn resolve_slugs(&mut self, source: &SlugSource) -> Result<Vec<String>> {
        let query = match source {
            SlugSource::List(slugs) => return Ok(slugs.clone()),
            SlugSource::Query(query) => query.trim(),
        };
        if let Some(cached) = self.slug_cache.get(query) {
            debug!("using cached slugs for query: {}", query);
            return Ok(cached.clone());
        }
        let found = self.store.query_slugs(query).await?;
        let slugs = dedup(found);
        info!("query returned {} project slugs", slugs.len());
        self.slug_cache.insert(query.to_string(), slugs.clone());
        Ok(slugs)
    }
}

/// Trimmed, non-empty, first occurrence kept.
fn dedup(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn in_job(name: &str, err: CalcError) -> CalcError {
    match err {
        CalcError::Config(msg) => CalcError::Config(format!("entry '{}': {}", name, msg)),
        other => other,
    }
}

/// Settings shared by every task of a job; later sources win.
fn job_env(job: &JobSpec, opts: &ExpandOptions) -> EnvMap {
    let mut env = EnvMap::from_map(opts.task_env.clone());
    for (k, v) in &job.extra_params {
        env.insert(format!("PARAM_{}", k), v.clone());
    }
    for (k, v) in &job.extra_env {
        env.insert(k.clone(), v.clone());
    }
    env.insert("CONN", opts.conn.clone());
    env.insert("TABLE", job.table.clone());
    env
}

fn new_task(
    index: usize,
    job_name: &str,
    job: &JobSpec,
    metric: &str,
    slug: &str,
    range: TimeRange,
    base: &EnvMap,
) -> Task {
    let mut env = base.clone();
    env.insert("METRIC", metric);
    env.insert("PROJECT_SLUG", slug);
    env.insert("TIME_RANGE", range.as_code());
    Task {
        index,
        job: job_name.to_string(),
        metric: metric.to_string(),
        table: job.table.clone(),
        slug: slug.to_string(),
        range,
        env,
    }
}
