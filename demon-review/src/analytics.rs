//! Derived read-only analytics
//!
//! Everything here is a SELECT over the store written by demon-extract:
//! entity validity per table, location counts by school category, the
//! location summary views, entities ranked by nested collection size, and
//! the run history.
//!
//! Table names interpolated into SQL are checked against the store's own
//! catalog first.

use anyhow::{bail, Result};
use demon_common::db::{is_safe_identifier, quote_ident};
use serde::Serialize;
use sqlx::SqlitePool;

/// Valid vs partial rows of one entity table
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntityValidity {
    pub table: String,
    pub total: i64,
    pub valid: i64,
    pub partial: i64,
}

impl EntityValidity {
    pub fn valid_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 * 100.0 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct FileTypeRow {
    pub file_type: String,
    pub template_count: i64,
    pub valid_count: i64,
    pub valid_percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct ValidationSummary {
    pub total_templates: i64,
    pub valid_templates: i64,
    pub invalid_templates: i64,
    pub validation_success_rate: f64,
}

/// One entity ranked by its nested row count
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopEntity {
    pub source_path: String,
    pub nested_rows: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct RunRow {
    pub run_id: String,
    pub job: String,
    pub revision: Option<String>,
    pub status: String,
    pub processed: i64,
    pub committed: i64,
    pub write_failures: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, sqlx::FromRow)]
pub struct FailureRow {
    pub source_path: Option<String>,
    pub stage: String,
    pub message: String,
}

/// Primary entity tables (those carrying `materialize_status`)
pub async fn entity_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT m.name
        FROM sqlite_master m
        WHERE m.type = 'table'
          AND m.name NOT LIKE 'sqlite_%'
          AND instr(m.name, '__') = 0
          AND EXISTS (
              SELECT 1 FROM pragma_table_info(m.name) p WHERE p.name = 'materialize_status'
          )
        ORDER BY m.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(names.into_iter().filter(|n| is_safe_identifier(n)).collect())
}

/// Satellite tables of `table`
async fn satellite_tables(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let prefix = format!("{}__", table);
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND substr(name, 1, length(?1)) = ?1 ORDER BY name",
    )
    .bind(&prefix)
    .fetch_all(pool)
    .await?;

    Ok(names.into_iter().filter(|n| is_safe_identifier(n)).collect())
}

pub async fn validity_summary(pool: &SqlitePool) -> Result<Vec<EntityValidity>> {
    let mut rows = Vec::new();
    for table in entity_tables(pool).await? {
        let (total, valid): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COALESCE(SUM(is_valid), 0) FROM {}",
            quote_ident(&table)
        ))
        .fetch_one(pool)
        .await?;
        rows.push(EntityValidity {
            table,
            total,
            valid,
            partial: total - valid,
        });
    }
    Ok(rows)
}

/// Location rows per school category (`none` when unclassified)
pub async fn counts_by_category(pool: &SqlitePool) -> Result<Vec<CategoryCount>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT COALESCE(category, 'none') AS category, COUNT(*) AS count
        FROM template_locations
        GROUP BY COALESCE(category, 'none')
        ORDER BY count DESC, category ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect())
}

pub async fn file_type_summary(pool: &SqlitePool) -> Result<Vec<FileTypeRow>> {
    let rows = sqlx::query_as::<_, FileTypeRow>(
        "SELECT file_type, template_count, valid_count, valid_percentage FROM file_type_summary",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn validation_summary(pool: &SqlitePool) -> Result<ValidationSummary> {
    let row = sqlx::query_as::<_, ValidationSummary>(
        r#"
        SELECT total_templates, valid_templates, invalid_templates,
               CAST(validation_success_rate AS REAL) AS validation_success_rate
        FROM validation_summary
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Entities of `table` with the most nested collection rows
pub async fn top_entities(pool: &SqlitePool, table: &str, limit: i64) -> Result<Vec<TopEntity>> {
    if !entity_tables(pool).await?.iter().any(|t| t == table) {
        bail!("'{}' is not an entity table", table);
    }

    let satellites = satellite_tables(pool, table).await?;
    if satellites.is_empty() {
        return Ok(Vec::new());
    }

    let union = satellites
        .iter()
        .map(|s| format!("SELECT parent_key FROM {}", quote_ident(s)))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let sql = format!(
        "SELECT parent_key, COUNT(*) AS nested_rows FROM ({}) GROUP BY parent_key \
         ORDER BY nested_rows DESC, parent_key ASC LIMIT ?",
        union
    );

    let rows: Vec<(String, i64)> = sqlx::query_as(&sql).bind(limit).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|(source_path, nested_rows)| TopEntity {
            source_path,
            nested_rows,
        })
        .collect())
}

pub async fn run_history(pool: &SqlitePool, limit: i64) -> Result<Vec<RunRow>> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT run_id, job, revision, status, processed, committed, write_failures,
               CAST(started_at AS TEXT) AS started_at, CAST(finished_at AS TEXT) AS finished_at
        FROM ingest_runs
        ORDER BY started_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn run_failures(pool: &SqlitePool, run_id: &str) -> Result<Vec<FailureRow>> {
    let rows = sqlx::query_as::<_, FailureRow>(
        "SELECT source_path, stage, message FROM ingest_failures WHERE run_id = ? ORDER BY id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
