//! Per-task materializer: computes one (metric, project, window) into its destination table.

pub mod schema;
pub mod template;
pub mod upsert;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::{debug, error, info};

use crate::core::config::EnvMap;
use crate::core::error::Result;
use crate::core::store::{is_computed, quote_ident};
use crate::core::timerange::{RangeOptions, TimeRange, resolve};

use schema::{SourceColumn, coerce_row, create_table_sql, infer_columns, sample_rows};
use template::{QueryTemplate, TemplateVars};
use upsert::{BatchWriter, DEFAULT_MAX_PARAMS, RowKey, WriteStats};

pub const DEFAULT_SQL_PATH: &str = "./sql/";

/// Everything a single calc run needs.
#[derive(Debug, Clone)]
pub struct CalcRequest {
    pub conn: String,
    pub metric: String,
    /// Destination table as configured; see [`CalcRequest::destination`].
    pub table: String,
    pub project_slug: String,
    pub range: TimeRange,
    pub range_opts: RangeOptions,
    pub force: bool,
    pub drop: bool,
    /// One destination table per project slug.
    pub per_slug_table: bool,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub params: BTreeMap<String, String>,
    pub sql_path: PathBuf,
    pub max_params: usize,
}

impl CalcRequest {
    pub fn from_env(env: &EnvMap) -> Result<Self> {
        let range = env.require("TIME_RANGE")?.trim().parse()?;
        let max_params = env.parse_usize("MAX_PARAMS")?.unwrap_or(DEFAULT_MAX_PARAMS);
        Ok(Self {
            conn: env.require("CONN")?.to_string(),
            metric: env.require("METRIC")?.to_string(),
            table: env.require("TABLE")?.to_string(),
            project_slug: env.require("PROJECT_SLUG")?.to_string(),
            range,
            range_opts: RangeOptions::from_env(env),
            force: env.flag("FORCE_CALC"),
            drop: env.flag("DROP"),
            per_slug_table: env.flag("PPT"),
            limit: env.non_empty("LIMIT").map(str::to_string),
            offset: env.non_empty("OFFSET").map(str::to_string),
            params: env
                .params()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            sql_path: env
                .non_empty("SQL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SQL_PATH)),
            max_params,
        })
    }

    pub fn destination(&self) -> String {
        if self.per_slug_table {
            format!("{}_{}", self.table, self.project_slug)
        } else {
            self.table.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcStatus {
    Computed(WriteStats),
    /// The window was already computed; nothing was written.
    AlreadyComputed,
}

pub fn run_calc(conn: &Connection, req: &CalcRequest) -> Result<CalcStatus> {
    run_calc_at(conn, req, Utc::now())
}

pub fn run_calc_at(conn: &Connection, req: &CalcRequest, now: DateTime<Utc>) -> Result<CalcStatus> {
    let started = Instant::now();
    let table = req.destination();

    if req.drop {
        let drop = format!("drop table if exists {}", quote_ident(&table));
        debug!("drop table:\n{}", drop);
        conn.execute_batch(&drop).inspect_err(|_| error!("failed query:\n{}", drop))?;
    }

    let range = req.range.as_code();
    let window = resolve(req.range, now, &req.range_opts)?;
    debug!("time range '{}' resolved to {}", range, window);

    if is_computed(conn, &table, &req.project_slug, range, &window)? {
        if !req.force {
            debug!("table '{}' doesn't need calculation now", table);
            return Ok(CalcStatus::AlreadyComputed);
        }
        info!(
            "table '{}' doesn't need calculation but it was requested to calculate anyway",
            table
        );
    }

    let query = QueryTemplate::load(&req.sql_path, &req.metric)?;
    let (date_from, date_to) = window.quoted();
    let sql = query.render(&TemplateVars {
        project_slug: req.project_slug.clone(),
        date_from,
        date_to,
        limit: req.limit.clone(),
        offset: req.offset.clone(),
        params: req.params.clone(),
    });
    debug!("generated SQL:\n{}", sql);

    let key = RowKey {
        time_range: range.to_string(),
        project_slug: req.project_slug.clone(),
        calculated_at: now,
        date_from: window.date_from(),
        date_to: window.date_to(),
    };
    let stats = materialize(conn, &sql, &table, &key, !req.per_slug_table, req.max_params)?;
    info!(
        "'{}' for '{}' {} {}: {} rows in {} batches, took {:?}",
        req.metric,
        req.project_slug,
        range,
        window,
        stats.rows,
        stats.batches,
        started.elapsed()
    );
    Ok(CalcStatus::Computed(stats))
}

/// Runs `sql`, creates the destination from the result shape and streams rows into it.
/// An empty result creates nothing, so the column types are never guessed.
fn materialize(
    conn: &Connection,
    sql: &str,
    table: &str,
    key: &RowKey,
    index_slug: bool,
    max_params: usize,
) -> Result<WriteStats> {
    let mut stmt = conn
        .prepare(sql)
        .inspect_err(|_| error!("failed query:\n{}", sql))?;
    let source: Vec<SourceColumn> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
        .collect();
    debug!("columns: {:?}", source);

    let mut rows = stmt.query([])?;
    let sample = sample_rows(&source, &mut rows)?;
    if sample.is_empty() {
        info!("query returned no rows, nothing to write into '{}'", table);
        return Ok(WriteStats::default());
    }
    let columns = infer_columns(&source, &sample)?;

    let ddl = create_table_sql(table, &columns, index_slug);
    debug!("create table:\n{}", ddl);
    conn.execute_batch(&ddl)
        .inspect_err(|_| error!("failed query:\n{}", ddl))?;

    let mut writer = BatchWriter::new(conn, table, columns.clone(), key, max_params)?;
    for values in &sample {
        writer.push(coerce_row(&columns, values.iter().map(ValueRef::from))?)?;
    }
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|idx| row.get_ref(idx))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        writer.push(coerce_row(&columns, values)?)?;
    }
    writer.finish()
}
