use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{is_missing_table, quote_ident};
use crate::core::error::Result;
use crate::core::timerange::TimeWindow;

/// Whether `table` already holds rows for this project, range code and window.
///
/// Both bounds are compared as day starts, the same form the writer stores.
/// A destination table that does not exist yet simply means "not computed".
pub fn is_computed(
    conn: &Connection,
    table: &str,
    slug: &str,
    range: &str,
    window: &TimeWindow,
) -> Result<bool> {
    let sql = format!(
        "select last_calculated_at from {} where time_range = ?1 and date_from = ?2 \
         and date_to = ?3 and project_slug = ?4 limit 1",
        quote_ident(table)
    );
    let (from, to) = (window.date_from(), window.date_to());
    debug!(
        "executing sql: {} with args: [{}, {}, {}, {}]",
        sql, range, from, to, slug
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(stmt) => stmt,
        Err(e) if is_missing_table(&e) => {
            info!(
                "table '{}' does not exist yet, so we need to calculate this metric",
                table
            );
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };
    let last: Option<DateTime<Utc>> = stmt
        .query_row(params![range, from, to, slug], |row| row.get(0))
        .optional()?;

    match last {
        Some(at) => {
            info!(
                "table '{}' was last computed at {} for ('{}', {}, {}, {}), so calculation is not needed",
                table, at, slug, range, from, to
            );
            Ok(true)
        }
        None => {
            info!(
                "table '{}' present, but it needs calculation for ('{}', {}, {}, {})",
                table, slug, range, from, to
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timerange::parse_any;

    fn window(from: &str, to: &str) -> TimeWindow {
        TimeWindow {
            from: parse_any(from).unwrap(),
            to: parse_any(to).unwrap(),
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "create table m(time_range text, project_slug text, last_calculated_at text,
                            date_from date, date_to date, row_number int);",
        )
        .unwrap();
        conn.execute(
            "insert into m values ('7d', 'a', ?1, '2024-05-06', '2024-05-13', 1)",
            params![Utc::now()],
        )
        .unwrap();
        conn
    }

    #[test]
    fn missing_table_means_not_computed() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!is_computed(&conn, "m", "a", "7d", &window("2024-05-06", "2024-05-13")).unwrap());
    }

    #[test]
    fn matching_window_is_computed() {
        let conn = seeded();
        assert!(is_computed(&conn, "m", "a", "7d", &window("2024-05-06", "2024-05-13")).unwrap());
    }

    #[test]
    fn bounds_are_day_truncated() {
        let conn = seeded();
        let w = window("2024-05-06 13:00", "2024-05-13 23:59:59");
        assert!(is_computed(&conn, "m", "a", "7d", &w).unwrap());
    }

    #[test]
    fn other_range_or_window_is_not_computed() {
        let conn = seeded();
        assert!(!is_computed(&conn, "m", "a", "7dp", &window("2024-05-06", "2024-05-13")).unwrap());
        assert!(!is_computed(&conn, "m", "a", "7d", &window("2024-05-06", "2024-05-14")).unwrap());
    }

    #[test]
    fn other_slug_in_shared_table_is_not_computed() {
        let conn = seeded();
        let w = window("2024-05-06", "2024-05-13");
        assert!(is_computed(&conn, "m", "a", "7d", &w).unwrap());
        assert!(!is_computed(&conn, "m", "b", "7d", &w).unwrap());
    }

    #[test]
    fn other_failures_propagate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("create table m(x int)").unwrap();
        assert!(is_computed(&conn, "m", "a", "7d", &window("2024-05-06", "2024-05-13")).is_err());
    }
}
