//! Destination schema inferred from the shape of a metric query result.

use rusqlite::Rows;
use rusqlite::types::{Type, Value, ValueRef};

use crate::core::error::{CalcError, Result};
use crate::core::store::quote_ident;

/// Columns every destination table carries ahead of the result columns.
pub const BOOKKEEPING_COLUMNS: [&str; 6] = [
    "time_range",
    "project_slug",
    "last_calculated_at",
    "date_from",
    "date_to",
    "row_number",
];

pub const PRIMARY_KEY: &str = "time_range, project_slug, date_from, date_to, row_number";

/// Coarse destination type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Boolean,
    Integer,
}

impl ColumnType {
    /// Maps a declared column type; a size suffix such as `varchar(6)` is ignored.
    pub fn from_decl(decl: &str) -> Result<Self> {
        let name = decl.split('(').next().unwrap_or_default().trim().to_ascii_lowercase();
        match name.as_str() {
            "text" | "varchar" | "char" | "character" | "clob" | "string" => Ok(ColumnType::Text),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int2"
            | "int4" | "int8" | "int16" | "int32" | "int64" => Ok(ColumnType::Integer),
            _ => Err(CalcError::schema(format!("unknown type: '{}'", decl))),
        }
    }

    /// Types an undeclared (expression) column by the storage class of a non-null sample.
    pub fn from_storage(ty: Type) -> Result<Self> {
        match ty {
            Type::Integer => Ok(ColumnType::Integer),
            Type::Text => Ok(ColumnType::Text),
            Type::Null => Err(CalcError::schema("cannot infer a type from null values")),
            Type::Real => Err(CalcError::schema("unknown type: 'real'")),
            Type::Blob => Err(CalcError::schema("unknown type: 'blob'")),
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "bigint",
        }
    }

    /// Converts a source value into what gets bound for this column. A value that does
    /// not fit the column's type fails the same way on every attempt.
    pub fn coerce(&self, column: &str, value: ValueRef<'_>) -> Result<Value> {
        let bad = |what: &str| {
            CalcError::schema(format!(
                "cannot store {} in {} column '{}'",
                what,
                self.sql_type(),
                column
            ))
        };
        match (self, value) {
            (_, ValueRef::Null) => Ok(Value::Null),
            (_, ValueRef::Blob(_)) => Err(bad("a blob")),
            (ColumnType::Text, ValueRef::Text(t)) => {
                Ok(Value::Text(String::from_utf8_lossy(t).into_owned()))
            }
            (ColumnType::Text, ValueRef::Integer(i)) => Ok(Value::Text(i.to_string())),
            (ColumnType::Text, ValueRef::Real(f)) => Ok(Value::Text(f.to_string())),
            (_, ValueRef::Integer(i)) => Ok(Value::Integer(i)),
            (_, ValueRef::Real(f)) if f.fract() == 0.0 => Ok(Value::Integer(f as i64)),
            (_, ValueRef::Real(f)) => Err(bad(&format!("fractional value {}", f))),
            (ColumnType::Boolean, ValueRef::Text(t)) => {
                match String::from_utf8_lossy(t).trim().to_ascii_lowercase().as_str() {
                    "1" | "t" | "true" => Ok(Value::Integer(1)),
                    "0" | "f" | "false" => Ok(Value::Integer(0)),
                    other => Err(bad(&format!("'{}'", other))),
                }
            }
            (ColumnType::Integer, ValueRef::Text(t)) => {
                let raw = String::from_utf8_lossy(t);
                raw.trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| bad(&format!("'{}'", raw)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

/// Name and declared type of each result column, as the prepared statement reports them.
pub type SourceColumn = (String, Option<String>);

fn needs_sample(source: &[SourceColumn], samples: &[Option<Type>]) -> bool {
    source
        .iter()
        .zip(samples)
        .any(|((_, decl), sample)| decl.is_none() && sample.is_none())
}

/// Reads rows until every undeclared column has shown a non-null value, or the result
/// ends. Returns the rows read; an empty vector means the result had no rows.
pub fn sample_rows(source: &[SourceColumn], rows: &mut Rows<'_>) -> Result<Vec<Vec<Value>>> {
    let mut samples: Vec<Option<Type>> = vec![None; source.len()];
    let mut buffered = Vec::new();
    while buffered.is_empty() || needs_sample(source, &samples) {
        let Some(row) = rows.next()? else {
            break;
        };
        let values = (0..source.len())
            .map(|idx| row.get_ref(idx).map(Value::from))
            .collect::<rusqlite::Result<Vec<Value>>>()?;
        for (sample, value) in samples.iter_mut().zip(&values) {
            if sample.is_none() && value.data_type() != Type::Null {
                *sample = Some(value.data_type());
            }
        }
        buffered.push(values);
    }
    Ok(buffered)
}

/// Infers result columns from `sample`, as returned by [`sample_rows`]. Declared types
/// win; expression columns take the storage class of their first non-null value.
pub fn infer_columns(source: &[SourceColumn], sample: &[Vec<Value>]) -> Result<Vec<ColumnSpec>> {
    let mut columns: Vec<ColumnSpec> = Vec::with_capacity(source.len());
    for (idx, (name, decl)) in source.iter().enumerate() {
        if BOOKKEEPING_COLUMNS.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(CalcError::schema(format!(
                "result column '{}' collides with a bookkeeping column",
                name
            )));
        }
        if columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(CalcError::schema(format!("duplicate result column '{}'", name)));
        }
        let ty = match decl {
            Some(decl) => ColumnType::from_decl(decl),
            None => {
                let first = sample
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(Value::data_type)
                    .find(|ty| *ty != Type::Null)
                    .unwrap_or(Type::Null);
                ColumnType::from_storage(first)
            }
        }
        .map_err(|e| match e {
            CalcError::Schema(msg) => CalcError::Schema(format!("{} in column '{}'", msg, name)),
            other => other,
        })?;
        columns.push(ColumnSpec {
            name: name.clone(),
            ty,
        });
    }
    Ok(columns)
}

/// Coerces one row of values, in column order.
pub fn coerce_row<'v>(
    columns: &[ColumnSpec],
    values: impl IntoIterator<Item = ValueRef<'v>>,
) -> Result<Vec<Value>> {
    columns
        .iter()
        .zip(values)
        .map(|(col, value)| col.ty.coerce(&col.name, value))
        .collect()
}

/// DDL for the destination table plus its indexes; the slug index is skipped for
/// per-slug tables.
pub fn create_table_sql(table: &str, columns: &[ColumnSpec], index_slug: bool) -> String {
    let quoted = quote_ident(table);
    let mut ddl = format!(
        "create table if not exists {}(\n  \
         time_range text not null,\n  \
         project_slug text not null,\n  \
         last_calculated_at timestamp not null,\n  \
         date_from date not null,\n  \
         date_to date not null,\n  \
         row_number bigint not null,\n",
        quoted
    );
    for column in columns {
        ddl.push_str(&format!(
            "  {} {},\n",
            quote_ident(&column.name),
            column.ty.sql_type()
        ));
    }
    ddl.push_str(&format!("  primary key({})\n);\n", PRIMARY_KEY));
    ddl.push_str(&format!(
        "create index if not exists {} on {}(time_range);\n",
        quote_ident(&format!("{}_time_range_idx", table)),
        quoted
    ));
    if index_slug {
        ddl.push_str(&format!(
            "create index if not exists {} on {}(project_slug);\n",
            quote_ident(&format!("{}_project_slug_idx", table)),
            quoted
        ));
    }
    ddl
}
