//! Run configuration.
//!
//! The process environment is only read at the CLI boundary: [`EnvMap`] strips the `V3_`
//! prefix from every variable, and everything below the CLI receives an explicit record
//! ([`SyncConfig`] for the orchestrator, `CalcRequest` for a single task).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{CalcError, Result};

pub const ENV_PREFIX: &str = "V3_";

pub const DEFAULT_CATALOG: &str = "./calculations.yaml";

/// Keys only the orchestrator understands; they are never forwarded to tasks.
const SYNC_ONLY_KEYS: &[&str] = &[
    "CONN",
    "THREADS",
    "RETRY",
    "HEARTBEAT",
    "DRY_RUN",
    "PROJECT_SLUGS",
    "TIME_RANGES",
    "CATALOG",
    "BIN_PATH",
    "EXECUTOR",
    "NO_SHUFFLE",
    "METRIC",
    "TABLE",
    "PROJECT_SLUG",
    "TIME_RANGE",
];

/// Prefix-stripped view of `V3_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap(BTreeMap<String, String>);

impl EnvMap {
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Keeps only prefixed pairs, with the prefix removed.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let map = pairs
            .into_iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .filter(|stripped| !stripped.is_empty())
                    .map(|stripped| (stripped.to_string(), v))
            })
            .collect();
        EnvMap(map)
    }

    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        EnvMap(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value for `key`, treating an empty string as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            CalcError::config(format!(
                "you must define {}{} environment variable to run this",
                ENV_PREFIX, key
            ))
        })
    }

    /// A flag is on when present, unless explicitly set to an off value.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
            None => false,
        }
    }

    pub fn parse_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.non_empty(key) {
            Some(raw) => raw.parse::<usize>().map(Some).map_err(|e| {
                CalcError::config(format!("cannot parse {}{}='{}': {}", ENV_PREFIX, key, raw, e))
            }),
            None => Ok(None),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `PARAM_<name>` entries, yielded as `(name, value)`.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter_map(|(k, v)| k.strip_prefix("PARAM_").map(|name| (name, v)))
    }

    /// Pairs with the prefix restored, ready to hand to a child process.
    pub fn to_prefixed(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Spawn the `calc` subcommand per task.
    Process,
    /// Run the materializer inside the orchestrator process.
    InProcess,
}

impl ExecutorKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "process" => Ok(ExecutorKind::Process),
            "in-process" | "inprocess" => Ok(ExecutorKind::InProcess),
            other => Err(CalcError::config(format!(
                "unknown executor '{}', expected 'process' or 'in-process'",
                other
            ))),
        }
    }
}

/// Orchestrator overrides for a single `sync` run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub conn: String,
    pub catalog_path: PathBuf,
    pub threads: Option<usize>,
    pub retry: usize,
    pub heartbeat: Option<Duration>,
    pub dry_run: bool,
    pub debug: bool,
    pub shuffle: bool,
    pub project_slugs: Option<String>,
    pub time_ranges: Option<String>,
    pub executor: ExecutorKind,
    pub bin_path: Option<PathBuf>,
    /// Settings forwarded unchanged to every task.
    pub task_env: BTreeMap<String, String>,
}

impl SyncConfig {
    pub fn new(conn: impl Into<String>) -> Self {
        Self {
            conn: conn.into(),
            catalog_path: PathBuf::from(DEFAULT_CATALOG),
            threads: None,
            retry: 0,
            heartbeat: None,
            dry_run: false,
            debug: false,
            shuffle: true,
            project_slugs: None,
            time_ranges: None,
            executor: ExecutorKind::Process,
            bin_path: None,
            task_env: BTreeMap::new(),
        }
    }

    pub fn from_env(env: &EnvMap) -> Result<Self> {
        let mut cfg = SyncConfig::new(env.require("CONN")?);
        if let Some(path) = env.non_empty("CATALOG") {
            cfg.catalog_path = PathBuf::from(path);
        }
        cfg.threads = env.parse_usize("THREADS")?.filter(|n| *n > 0);
        cfg.retry = env.parse_usize("RETRY")?.unwrap_or(0);
        cfg.heartbeat = env
            .parse_usize("HEARTBEAT")?
            .filter(|s| *s > 0)
            .map(|s| Duration::from_secs(s as u64));
        cfg.dry_run = env.flag("DRY_RUN");
        cfg.debug = env.flag("DEBUG");
        cfg.shuffle = !env.flag("NO_SHUFFLE");
        cfg.project_slugs = env.non_empty("PROJECT_SLUGS").map(str::to_string);
        cfg.time_ranges = env.non_empty("TIME_RANGES").map(str::to_string);
        if let Some(kind) = env.non_empty("EXECUTOR") {
            cfg.executor = ExecutorKind::parse(kind)?;
        }
        cfg.bin_path = env.non_empty("BIN_PATH").map(PathBuf::from);
        cfg.task_env = env
            .iter()
            .filter(|(k, _)| !SYNC_ONLY_KEYS.contains(k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(cfg)
    }

    /// Worker count: the override, else the detected hardware parallelism.
    pub fn worker_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
