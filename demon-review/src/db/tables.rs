//! Table listing with row counts

use anyhow::Result;
use demon_common::db::{is_safe_identifier, quote_ident};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub row_count: i64,
}

/// All user tables in alphabetical order, excluding SQLite internals
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<TableInfo>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name
        FROM sqlite_master
        WHERE type = 'table'
          AND name NOT LIKE 'sqlite_%'
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        // Names come from sqlite_master, but entity tables are derived from
        // type dumps; only count tables with plain identifiers
        if !is_safe_identifier(&name) {
            continue;
        }
        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)))
            .fetch_one(pool)
            .await?;
        tables.push(TableInfo { name, row_count });
    }

    Ok(tables)
}
