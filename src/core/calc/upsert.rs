//! Batched, idempotent upsert of result rows.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, error};

use super::schema::{BOOKKEEPING_COLUMNS, ColumnSpec, PRIMARY_KEY};
use crate::core::error::{CalcError, Result};
use crate::core::store::quote_ident;

pub const DEFAULT_MAX_PARAMS: usize = 1000;

/// Rows per statement for a bound-parameter ceiling of `max_params`.
pub fn rows_per_statement(max_params: usize, value_columns: usize) -> Result<usize> {
    let width = BOOKKEEPING_COLUMNS.len() + value_columns;
    match max_params / width {
        0 => Err(CalcError::schema(format!(
            "a row needs {} parameters, more than the ceiling of {}",
            width, max_params
        ))),
        n => Ok(n),
    }
}

/// `insert ... on conflict do update` over `rows` rows; every non-key column is overwritten.
pub fn upsert_sql(table: &str, columns: &[ColumnSpec], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let mut all = BOOKKEEPING_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    all.extend(names.iter().cloned());

    let tuple = format!("({})", vec!["?"; all.len()].join(", "));
    let values = vec![tuple; rows].join(", ");

    let mut updates = vec!["last_calculated_at = excluded.last_calculated_at".to_string()];
    updates.extend(names.iter().map(|n| format!("{} = excluded.{}", n, n)));

    format!(
        "insert into {}({}) values {} on conflict({}) do update set {}",
        quote_ident(table),
        all.join(", "),
        values,
        PRIMARY_KEY,
        updates.join(", ")
    )
}

/// Bookkeeping values shared by every row of one task.
#[derive(Debug, Clone)]
pub struct RowKey {
    pub time_range: String,
    pub project_slug: String,
    pub calculated_at: DateTime<Utc>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub rows: usize,
    pub batches: usize,
}

/// Accumulates rows and flushes them in parameter-limit-bounded statements.
pub struct BatchWriter<'c> {
    conn: &'c Connection,
    table: String,
    columns: Vec<ColumnSpec>,
    key: [Value; 5],
    rows_per_statement: usize,
    pending: Vec<Value>,
    pending_rows: usize,
    stats: WriteStats,
}

impl<'c> BatchWriter<'c> {
    pub fn new(
        conn: &'c Connection,
        table: &str,
        columns: Vec<ColumnSpec>,
        key: &RowKey,
        max_params: usize,
    ) -> Result<Self> {
        let rows_per_statement = rows_per_statement(max_params, columns.len())?;
        debug!(
            "writing into '{}' with {} rows per statement",
            table, rows_per_statement
        );
        Ok(Self {
            conn,
            table: table.to_string(),
            columns,
            key: [
                Value::Text(key.time_range.clone()),
                Value::Text(key.project_slug.clone()),
                Value::Text(key.calculated_at.to_rfc3339()),
                Value::Text(key.date_from.format("%F").to_string()),
                Value::Text(key.date_to.format("%F").to_string()),
            ],
            rows_per_statement,
            pending: Vec::new(),
            pending_rows: 0,
            stats: WriteStats::default(),
        })
    }

    /// Queues one row of already coerced values; its sequence number is assigned here.
    pub fn push(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(CalcError::data(format!(
                "row has {} values, expected {}",
                values.len(),
                self.columns.len()
            )));
        }
        self.stats.rows += 1;
        self.pending.extend(self.key.iter().cloned());
        self.pending.push(Value::Integer(self.stats.rows as i64));
        self.pending.extend(values);
        self.pending_rows += 1;
        if self.pending_rows == self.rows_per_statement {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes the final partial batch.
    pub fn finish(mut self) -> Result<WriteStats> {
        if self.pending_rows > 0 {
            self.flush()?;
        }
        Ok(self.stats)
    }

    fn flush(&mut self) -> Result<()> {
        let sql = upsert_sql(&self.table, &self.columns, self.pending_rows);
        debug!(
            "flush of {} rows ({} args) into '{}'",
            self.pending_rows,
            self.pending.len(),
            self.table
        );
        if let Err(e) = self.conn.execute(&sql, params_from_iter(self.pending.iter())) {
            error!(
                "failed query:\n{}\nargs({}): {:?}",
                sql,
                self.pending.len(),
                self.pending
            );
            return Err(e.into());
        }
        self.pending.clear();
        self.pending_rows = 0;
        self.stats.batches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calc::schema::{ColumnType, create_table_sql};

    fn columns(n: usize) -> Vec<ColumnSpec> {
        (0..n)
            .map(|i| ColumnSpec {
                name: format!("c{}", i),
                ty: ColumnType::Integer,
            })
            .collect()
    }

    fn key() -> RowKey {
        RowKey {
            time_range: "7d".into(),
            project_slug: "kube".into(),
            calculated_at: Utc::now(),
            date_from: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2024, 5, 13).unwrap(),
        }
    }

    fn table(conn: &Connection, cols: &[ColumnSpec]) {
        conn.execute_batch(&create_table_sql("m", cols, true)).unwrap();
    }

    fn write(conn: &Connection, cols: &[ColumnSpec], rows: usize, max_params: usize) -> WriteStats {
        let mut writer = BatchWriter::new(conn, "m", cols.to_vec(), &key(), max_params).unwrap();
        for r in 0..rows {
            writer
                .push((0..cols.len()).map(|c| Value::Integer((r * 10 + c) as i64)).collect())
                .unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn batch_size_follows_parameter_ceiling() {
        assert_eq!(rows_per_statement(1000, 4).unwrap(), 100);
        assert_eq!(rows_per_statement(1000, 0).unwrap(), 166);
        assert_eq!(rows_per_statement(16, 10).unwrap(), 1);
        assert!(matches!(rows_per_statement(15, 10), Err(CalcError::Schema(_))));
    }

    #[test]
    fn remainder_goes_into_last_statement() {
        let conn = Connection::open_in_memory().unwrap();
        let cols = columns(4);
        table(&conn, &cols);
        let stats = write(&conn, &cols, 260, 1000);
        assert_eq!(stats, WriteStats { rows: 260, batches: 3 });
        let count: i64 = conn.query_row("select count(*) from m", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 260);
        let max: i64 = conn.query_row("select max(row_number) from m", [], |r| r.get(0)).unwrap();
        assert_eq!(max, 260);
    }

    #[test]
    fn exact_multiple_has_no_empty_flush() {
        let conn = Connection::open_in_memory().unwrap();
        let cols = columns(4);
        table(&conn, &cols);
        assert_eq!(write(&conn, &cols, 200, 1000).batches, 2);
        assert_eq!(write(&conn, &cols, 0, 1000).batches, 0);
    }

    #[test]
    fn rewriting_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let cols = columns(2);
        table(&conn, &cols);
        write(&conn, &cols, 30, 50);
        let snapshot = |conn: &Connection| -> Vec<(i64, i64, i64)> {
            conn.prepare("select row_number, c0, c1 from m order by row_number")
                .unwrap()
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };
        let before = snapshot(&conn);
        write(&conn, &cols, 30, 50);
        assert_eq!(snapshot(&conn), before);
    }

    #[test]
    fn conflicting_rows_overwrite_values() {
        let conn = Connection::open_in_memory().unwrap();
        let cols = columns(1);
        table(&conn, &cols);
        let mut writer = BatchWriter::new(&conn, "m", cols.clone(), &key(), 1000).unwrap();
        writer.push(vec![Value::Integer(1)]).unwrap();
        writer.finish().unwrap();
        let mut writer = BatchWriter::new(&conn, "m", cols.clone(), &key(), 1000).unwrap();
        writer.push(vec![Value::Integer(7)]).unwrap();
        writer.finish().unwrap();
        let (n, v): (i64, i64) = conn
            .query_row("select count(*), max(c0) from m", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!((n, v), (1, 7));
    }

    #[test]
    fn failed_batch_is_a_data_error() {
        let conn = Connection::open_in_memory().unwrap();
        let cols = columns(1);
        // no destination table
        let mut writer = BatchWriter::new(&conn, "m", cols, &key(), 1000).unwrap();
        writer.push(vec![Value::Integer(1)]).unwrap();
        assert!(matches!(writer.finish(), Err(CalcError::Data(_))));
    }

    #[test]
    fn sql_lists_every_non_key_column_in_update() {
        let sql = upsert_sql("m", &columns(2), 2);
        assert!(sql.contains("values (?, ?, ?, ?, ?, ?, ?, ?), (?, ?, ?, ?, ?, ?, ?, ?)"));
        assert!(sql.contains("\"c0\" = excluded.\"c0\", \"c1\" = excluded.\"c1\""));
        assert!(sql.contains("on conflict(time_range, project_slug, date_from, date_to, row_number)"));
    }
}
