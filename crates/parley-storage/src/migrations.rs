//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Apply every migration newer than the recorded schema version.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: product_catalog");
    }

    Ok(())
}

/// Version 1: the product table the product-search route queries.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS product (
            product_link    TEXT NOT NULL DEFAULT '',
            title           TEXT NOT NULL,
            brand           TEXT NOT NULL DEFAULT '',
            price           INTEGER NOT NULL,
            discount        REAL NOT NULL DEFAULT 0.0,
            avg_rating      REAL NOT NULL DEFAULT 0.0,
            total_ratings   INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_product_brand ON product(brand);
        CREATE INDEX IF NOT EXISTS idx_product_price ON product(price);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'product_catalog');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Migration v1 failed: {}", e)))
}
