//! Tabular catalog over SQLite
//!
//! The modeling tools treat the catalog as a cache of intermediate results
//! keyed by composite identifiers (`bin_model`, `event_station`). Everything
//! crosses this boundary as text: `select` returns a column-addressable
//! [`Table`], `insert_rows` takes rows of optional string values and upserts
//! them. `None` is written as SQL NULL; any string, `"NULL"` included, is
//! stored as given.

use crate::{Error, Result};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use tracing::debug;

/// Result of a `select`, stored column-major
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    cells: Vec<Vec<Option<String>>>,
    n_row: usize,
}

impl Table {
    fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        let cells = vec![Vec::new(); columns.len()];
        Self {
            columns,
            index,
            cells,
            n_row: 0,
        }
    }

    /// Number of rows
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    /// Column names in select order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn column(&self, name: &str) -> Result<&[Option<String>]> {
        self.index
            .get(name)
            .map(|&i| self.cells[i].as_slice())
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    /// Column as strings; NULL becomes an empty string
    pub fn get_string(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .column(name)?
            .iter()
            .map(|v| v.clone().unwrap_or_default())
            .collect())
    }

    /// Column as optional strings
    pub fn get_optional_string(&self, name: &str) -> Result<Vec<Option<String>>> {
        Ok(self.column(name)?.to_vec())
    }

    /// Column as doubles; NULL becomes NaN
    pub fn get_double(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?
            .iter()
            .map(|v| match v {
                None => Ok(f64::NAN),
                Some(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| bad_value(name, s, e)),
            })
            .collect()
    }

    /// Column as integers; NULL is an error
    pub fn get_int(&self, name: &str) -> Result<Vec<i64>> {
        self.column(name)?
            .iter()
            .map(|v| match v {
                None => Err(Error::NullValue(name.to_string())),
                Some(s) => s
                    .trim()
                    .parse::<i64>()
                    .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
                    .map_err(|e| bad_value(name, s, e)),
            })
            .collect()
    }
}

/// Catalog handle; cheap to clone
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Create new catalog over an open pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run a query and return every row as text
    pub async fn select(&self, sql: &str) -> Result<Table> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        let mut table = Table::new(columns);

        for row in &rows {
            for i in 0..table.columns.len() {
                table.cells[i].push(cell_text(row, i)?);
            }
            table.n_row += 1;
        }

        debug!(rows = table.n_row, "catalog select");
        Ok(table)
    }

    /// Upsert rows of values into `table`
    ///
    /// Each row must have exactly one value per column; `None` is NULL.
    pub async fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64> {
        validate_identifier(table)?;
        for column in columns {
            validate_identifier(column)?;
        }
        if columns.is_empty() {
            return Err(Error::RowShape("no columns given".to_string()));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::RowShape(format!(
                    "row {} has {} values, expected {}",
                    row_index,
                    row.len(),
                    columns.len()
                )));
            }
            let mut query = sqlx::query(&sql);
            for value in row {
                query = query.bind(value.as_deref());
            }
            written += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(table, rows = rows.len(), "catalog insert");
        Ok(written)
    }

    /// Execute a schema or maintenance statement
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        Ok(sqlx::query(sql).execute(&self.pool).await?.rows_affected())
    }
}

/// Render a floating point value for `insert_rows`; NaN becomes NULL
pub fn format_double(value: f64) -> Option<String> {
    if value.is_nan() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Render an optional value for `insert_rows`
pub fn format_optional(value: Option<f64>) -> Option<String> {
    value.and_then(format_double)
}

fn bad_value(column: &str, value: &str, reason: impl std::fmt::Display) -> Error {
    Error::BadValue {
        column: column.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn cell_text(row: &sqlx::sqlite::SqliteRow, i: usize) -> Result<Option<String>> {
    let raw = row.try_get_raw(i)?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_string();
    let text = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(i)?.to_string(),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(i)?.to_string(),
        _ => row.try_get_unchecked::<String, _>(i)?,
    };
    Ok(Some(text))
}

fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}
