use anyhow::{Result, bail};
use tracing::info;

use crate::core::config::{EnvMap, SyncConfig};
use crate::core::orchestrator::run_sync;
use crate::core::terminal;
use crate::logging;

/// Folds `sync` flags into `env`; a flag wins over the matching `V3_` variable.
pub(crate) fn apply_sync_flags(args: &[String], start: usize, env: &mut EnvMap) -> Result<()> {
    let mut i = start;
    while i < args.len() {
        let flag = args[i].as_str();
        let key = match flag {
            "--dry-run" => {
                env.insert("DRY_RUN", "1");
                i += 1;
                continue;
            }
            "--no-shuffle" => {
                env.insert("NO_SHUFFLE", "1");
                i += 1;
                continue;
            }
            "--in-process" => {
                env.insert("EXECUTOR", "in-process");
                i += 1;
                continue;
            }
            "--debug" => {
                env.insert("DEBUG", "1");
                i += 1;
                continue;
            }
            "--conn" => "CONN",
            "--catalog" | "-c" => "CATALOG",
            "--threads" | "-j" => "THREADS",
            "--retry" => "RETRY",
            "--heartbeat" => "HEARTBEAT",
            "--slugs" => "PROJECT_SLUGS",
            "--ranges" => "TIME_RANGES",
            "--bin-path" => "BIN_PATH",
            other => bail!("unknown sync flag '{}'", other),
        };
        if i + 1 >= args.len() {
            bail!("{} expects a value", flag);
        }
        env.insert(key, args[i + 1].clone());
        i += 2;
    }
    Ok(())
}

pub async fn run_sync_command(args: &[String]) -> Result<()> {
    let mut env = EnvMap::from_process();
    apply_sync_flags(args, 2, &mut env)?;
    let cfg = SyncConfig::from_env(&env)?;
    logging::init(cfg.debug);

    info!(
        "sync: catalog '{}', {} workers, retry {}, executor {:?}",
        cfg.catalog_path.display(),
        cfg.worker_count(),
        cfg.retry,
        cfg.executor
    );
    let summary = run_sync(&cfg).await?;
    terminal::print_summary(&summary);
    if !summary.is_success() {
        bail!("{} of {} tasks failed", summary.failed, summary.total);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::apply_sync_flags;
    use crate::core::config::{EnvMap, ExecutorKind, SyncConfig};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        EnvMap::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn flags_override_environment() {
        let mut map = env(&[("V3_CONN", "env.db"), ("V3_THREADS", "16")]);
        apply_sync_flags(
            &args(&[
                "calcmetric",
                "sync",
                "--threads",
                "2",
                "--dry-run",
                "--in-process",
                "--ranges",
                "7d,30d",
            ]),
            2,
            &mut map,
        )
        .unwrap();
        let cfg = SyncConfig::from_env(&map).unwrap();
        assert_eq!(cfg.conn, "env.db");
        assert_eq!(cfg.worker_count(), 2);
        assert!(cfg.dry_run);
        assert_eq!(cfg.executor, ExecutorKind::InProcess);
        assert_eq!(cfg.time_ranges.as_deref(), Some("7d,30d"));
    }

    #[test]
    fn conn_flag_satisfies_required_setting() {
        let mut map = env(&[]);
        apply_sync_flags(&args(&["calcmetric", "sync", "--conn", "m.db"]), 2, &mut map).unwrap();
        assert_eq!(SyncConfig::from_env(&map).unwrap().conn, "m.db");
    }

    #[test]
    fn unknown_or_incomplete_flags_are_rejected() {
        let mut map = env(&[]);
        assert!(apply_sync_flags(&args(&["calcmetric", "sync", "--fast"]), 2, &mut map).is_err());
        assert!(
            apply_sync_flags(&args(&["calcmetric", "sync", "--retry"]), 2, &mut map).is_err()
        );
    }
}
