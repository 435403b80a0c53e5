use tracing::{error, info};

use crate::core::calc::{CalcRequest, CalcStatus, run_calc};
use crate::core::config::EnvMap;
use crate::core::error::{EXIT_SKIPPED, Result};
use crate::core::store::Store;
use crate::core::terminal;
use crate::logging;

/// Materializes one task from `V3_*` settings and returns the process exit code.
pub async fn run_calc_command() -> i32 {
    let env = EnvMap::from_process();
    logging::init(env.flag("DEBUG"));

    match calc(&env).await {
        Ok(CalcStatus::Computed(stats)) => {
            info!("wrote {} rows in {} batches", stats.rows, stats.batches);
            0
        }
        Ok(CalcStatus::AlreadyComputed) => EXIT_SKIPPED,
        Err(e) => {
            error!("calc failed: {}", e);
            terminal::print_error(&e.to_string());
            e.exit_code()
        }
    }
}

async fn calc(env: &EnvMap) -> Result<CalcStatus> {
    let req = CalcRequest::from_env(env)?;
    let store = Store::open(&req.conn)?;
    let conn = store.lock().await;
    run_calc(&conn, &req)
}
