//! Read-only store access
//!
//! The review tool never writes: connections are opened with `mode=ro`, so
//! a store being written by a running extraction is safe to inspect.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

mod tables;
pub use tables::{list_tables, TableInfo};

/// Open an existing store read-only
pub async fn connect_readonly(db_path: &Path) -> Result<SqlitePool> {
    if !db_path.exists() {
        anyhow::bail!(
            "Store not found: {}\nRun demon-extract first to create it.",
            db_path.display()
        );
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .context("Failed to open store in read-only mode")?;

    Ok(pool)
}
