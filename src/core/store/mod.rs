mod computed;
mod discovery;
mod sync;

pub use computed::is_computed;
pub use sync::{SYNC_TABLE, SyncCheck};

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::core::error::{CalcError, Result};

/// Shared handle on the metrics database.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens `target`, a database file path or `:memory:`.
    pub fn open(target: &str) -> Result<Self> {
        let conn = if target == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(target)
        }
        .map_err(|e| CalcError::Connectivity(format!("cannot open '{}': {}", target, e)))?;
        conn.busy_timeout(Duration::from_secs(60))
            .map_err(|e| CalcError::Connectivity(e.to_string()))?;
        if target != ":memory:" {
            // Concurrent calc processes share the file.
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| CalcError::Connectivity(e.to_string()))?;
        }
        debug!("Opened store '{}'", target);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().await
    }
}

/// True when the failure only says the table is not there yet.
pub fn is_missing_table(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.starts_with("no such table"),
        _ => false,
    }
}

/// Quotes an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
