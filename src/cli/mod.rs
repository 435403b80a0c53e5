mod calc;
mod sync;

use anyhow::Result;
use console::style;

use crate::core::terminal::{GuideSection, print_error};

fn print_help() {
    GuideSection::new("Commands")
        .command("sync", "Expand the catalog and compute every due metric")
        .command("calc", "Compute one metric window (configured through V3_* variables)")
        .command("help", "Show this screen")
        .print();

    GuideSection::new("Sync flags (override V3_* variables)")
        .command("--conn <path>", "Metrics database (V3_CONN)")
        .command("--catalog, -c <path>", "Catalog file (V3_CATALOG)")
        .command("--threads, -j <n>", "Worker count (V3_THREADS)")
        .command("--retry <n>", "Extra attempts for retryable failures (V3_RETRY)")
        .command("--heartbeat <secs>", "Log in-flight tasks periodically (V3_HEARTBEAT)")
        .command("--slugs <list>", "Replace every job's project slugs (V3_PROJECT_SLUGS)")
        .command("--ranges <list>", "Replace every job's time ranges (V3_TIME_RANGES)")
        .command("--bin-path <path>", "Binary spawned per task (V3_BIN_PATH)")
        .command("--in-process", "Compute tasks inside this process (V3_EXECUTOR)")
        .command("--dry-run", "Expand and schedule without computing (V3_DRY_RUN)")
        .command("--no-shuffle", "Dispatch tasks in catalog order (V3_NO_SHUFFLE)")
        .command("--debug", "Verbose logging (V3_DEBUG)")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("calcmetric").green()
    );
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("");
    match cmd {
        "sync" => sync::run_sync_command(&args).await,
        "calc" => {
            let code = calc::run_calc_command().await;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        "help" | "--help" | "-h" | "" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            std::process::exit(2);
        }
    }
}
