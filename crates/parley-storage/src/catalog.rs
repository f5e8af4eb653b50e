//! Product catalog backed by the SQLite `product` table.
//!
//! Generated queries only ever run through [`ProductCatalog::run_select`],
//! which accepts a single read-only `SELECT` statement and returns at most
//! `max_rows` rows as JSON objects keyed by column name.

use std::sync::Arc;

use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use parley_core::error::ParleyError;

use crate::db::Database;

/// One row of the `product` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_link: String,
    pub title: String,
    pub brand: String,
    /// Price in Indian Rupees.
    pub price: i64,
    /// Fractional discount: 0.2 means 20% off.
    pub discount: f64,
    /// Average rating on a 0-5 scale.
    pub avg_rating: f64,
    pub total_ratings: i64,
}

/// Rows returned by [`ProductCatalog::run_select`] unless configured otherwise.
pub const DEFAULT_MAX_ROWS: usize = 20;

/// Read-mostly access to the product table.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    db: Arc<Database>,
    max_rows: usize,
}

impl ProductCatalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Cap the rows a query may return. Values below 1 are raised to 1.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Insert a product row. Used for seeding and tests.
    pub fn insert(&self, product: &Product) -> Result<(), ParleyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO product
                    (product_link, title, brand, price, discount, avg_rating, total_ratings)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    product.product_link,
                    product.title,
                    product.brand,
                    product.price,
                    product.discount,
                    product.avg_rating,
                    product.total_ratings,
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to insert product: {}", e)))?;
            Ok(())
        })
    }

    pub fn count(&self) -> Result<i64, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM product", [], |row| row.get(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))
        })
    }

    /// Execute a single read-only `SELECT` and return its rows.
    ///
    /// Statements that are not a lone `SELECT` (writes, multiple statements,
    /// pragmas) are rejected with `ParleyError::Search` before execution.
    /// Rows past `max_rows` are never read.
    pub fn run_select(&self, sql: &str) -> Result<Vec<Value>, ParleyError> {
        let sql = validate_select(sql)?;
        let max_rows = self.max_rows;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| ParleyError::Search(format!("invalid query: {}", e)))?;
            if !stmt.readonly() {
                return Err(ParleyError::Search(
                    "only read-only queries are allowed".to_string(),
                ));
            }

            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = stmt
                .query([])
                .map_err(|e| ParleyError::Search(format!("query failed: {}", e)))?;

            let mut out = Vec::new();
            while out.len() < max_rows {
                let Some(row) = rows
                    .next()
                    .map_err(|e| ParleyError::Search(format!("row read failed: {}", e)))?
                else {
                    break;
                };
                let mut object = Map::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| ParleyError::Search(format!("column read failed: {}", e)))?;
                    object.insert(name.clone(), sql_to_json(value));
                }
                out.push(Value::Object(object));
            }
            debug!(rows = out.len(), "Catalog query executed");
            Ok(out)
        })
    }
}

/// Trim, drop one trailing semicolon, and require a lone `SELECT`.
fn validate_select(sql: &str) -> Result<&str, ParleyError> {
    let trimmed = sql.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    if trimmed.contains(';') {
        return Err(ParleyError::Search(
            "multiple statements are not allowed".to_string(),
        ));
    }
    let starts_with_select = trimmed
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"));
    if !starts_with_select {
        return Err(ParleyError::Search("only SELECT queries are allowed".to_string()));
    }
    Ok(trimmed)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}
