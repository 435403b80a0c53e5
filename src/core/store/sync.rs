use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::info;

use super::{Store, is_missing_table};
use crate::core::error::Result;

pub const SYNC_TABLE: &str = "metric_last_sync";

/// Outcome of a frequency check for one task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCheck {
    pub last_sync: Option<DateTime<Utc>>,
    pub should_run: bool,
}

impl Store {
    pub async fn check_frequency(&self, group: &str, max_frequency: Duration) -> Result<SyncCheck> {
        self.check_frequency_at(group, max_frequency, Utc::now()).await
    }

    /// Read-only; a missing sync table means the group never ran.
    pub async fn check_frequency_at(
        &self,
        group: &str,
        max_frequency: Duration,
        now: DateTime<Utc>,
    ) -> Result<SyncCheck> {
        let db = self.db.lock().await;
        let mut stmt =
            match db.prepare("SELECT last_synced_at FROM metric_last_sync WHERE metric_name = ?1") {
                Ok(stmt) => stmt,
                Err(e) if is_missing_table(&e) => {
                    info!(
                        "table {} does not exist yet, assuming '{}' was never synced",
                        SYNC_TABLE, group
                    );
                    return Ok(SyncCheck {
                        last_sync: None,
                        should_run: true,
                    });
                }
                Err(e) => return Err(e.into()),
            };
        let last: Option<DateTime<Utc>> = stmt
            .query_row(params![group], |row| row.get(0))
            .optional()?;

        let Some(last) = last else {
            info!(
                "there is no sync record for '{}' yet, assuming it needs calculations",
                group
            );
            return Ok(SyncCheck {
                last_sync: None,
                should_run: true,
            });
        };
        let age = (now - last).to_std().unwrap_or(Duration::ZERO);
        let should_run = age > max_frequency;
        info!(
            "last synced date for '{}' is {}, age {:?}, max frequency {:?}, should run: {}",
            group, last, age, max_frequency, should_run
        );
        Ok(SyncCheck {
            last_sync: Some(last),
            should_run,
        })
    }

    pub async fn mark_done(&self, group: &str) -> Result<()> {
        self.mark_done_at(group, Utc::now()).await
    }

    pub async fn mark_done_at(&self, group: &str, now: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS metric_last_sync (
                metric_name TEXT NOT NULL PRIMARY KEY,
                last_synced_at TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "INSERT INTO metric_last_sync (metric_name, last_synced_at) VALUES (?1, ?2)
             ON CONFLICT(metric_name) DO UPDATE SET last_synced_at = excluded.last_synced_at",
            params![group, now],
        )?;
        Ok(())
    }

    pub async fn last_synced(&self, group: &str) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().await;
        let mut stmt =
            match db.prepare("SELECT last_synced_at FROM metric_last_sync WHERE metric_name = ?1") {
                Ok(stmt) => stmt,
                Err(e) if is_missing_table(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
        let last = stmt
            .query_row(params![group], |row| row.get(0))
            .optional()?;
        Ok(last)
    }
}
