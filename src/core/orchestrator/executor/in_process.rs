use async_trait::async_trait;

use super::TaskExecutor;
use crate::core::calc::{CalcRequest, CalcStatus, run_calc};
use crate::core::orchestrator::types::{Outcome, Task};
use crate::core::store::Store;

/// Materializes tasks on the shared store; store work is serialized by its lock.
pub struct InProcessExecutor {
    store: Store,
}

impl InProcessExecutor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskExecutor for InProcessExecutor {
    async fn execute(&self, task: &Task) -> Outcome {
        let req = match CalcRequest::from_env(&task.env) {
            Ok(req) => req,
            Err(e) => return Outcome::failed(&e),
        };
        let db = self.store.lock().await;
        match run_calc(&db, &req) {
            Ok(CalcStatus::Computed(_)) => Outcome::Success,
            Ok(CalcStatus::AlreadyComputed) => Outcome::Skipped,
            Err(e) => Outcome::failed(&e),
        }
    }
}
