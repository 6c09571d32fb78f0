//! Store initialization
//!
//! Opens (creating if needed) the SQLite store and creates the fixed tables
//! shared by every run. Entity tables are derived from the type registry and
//! created later by the extraction writer.
//!
//! Failing to open the store is fatal for the whole run; callers propagate
//! the error instead of continuing without persistence.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open the store at `db_path` and create the fixed schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // One writer session: the batch writer holds its transaction on this
    // connection for the whole batch
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create the fixed tables and views, then run migrations (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_metadata_table(pool).await?;
    create_ingest_runs_table(pool).await?;
    create_ingest_failures_table(pool).await?;
    create_template_locations_table(pool).await?;
    create_location_views(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Key/value facts about the store (revision, schema dump, creator version)
async fn create_metadata_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ingest_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id TEXT PRIMARY KEY,
            job TEXT NOT NULL,
            revision TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            processed INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            committed INTEGER NOT NULL DEFAULT 0,
            write_failures INTEGER NOT NULL DEFAULT 0,
            started_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            finished_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ingest_failures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES ingest_runs(run_id) ON DELETE CASCADE,
            source_path TEXT,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolved template id → file location rows
async fn create_template_locations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS template_locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            template_id INTEGER NOT NULL UNIQUE,
            filename TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_directory TEXT NOT NULL,
            file_type TEXT NOT NULL,
            category TEXT,
            deck_kind TEXT,
            is_valid INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_template_locations_filename ON template_locations(filename)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_template_locations_file_type ON template_locations(file_type)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_location_views(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS template_lookup AS
        SELECT template_id, filename, file_name, file_type, file_directory, category
        FROM template_locations
        WHERE is_valid = 1
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS file_type_summary AS
        SELECT
            file_type,
            COUNT(*) AS template_count,
            SUM(CASE WHEN is_valid = 1 THEN 1 ELSE 0 END) AS valid_count,
            ROUND(AVG(CASE WHEN is_valid = 1 THEN 1.0 ELSE 0.0 END) * 100, 2) AS valid_percentage
        FROM template_locations
        GROUP BY file_type
        ORDER BY template_count DESC
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS validation_summary AS
        SELECT
            COUNT(*) AS total_templates,
            COALESCE(SUM(CASE WHEN is_valid = 1 THEN 1 ELSE 0 END), 0) AS valid_templates,
            COALESCE(SUM(CASE WHEN is_valid = 1 THEN 0 ELSE 1 END), 0) AS invalid_templates,
            COALESCE(ROUND(AVG(CASE WHEN is_valid = 1 THEN 1.0 ELSE 0.0 END) * 100, 2), 0.0) AS validation_success_rate
        FROM template_locations
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS deck_files AS
        SELECT template_id, filename, file_name, deck_kind, category
        FROM template_locations
        WHERE file_type = 'deck' AND is_valid = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or replace one metadata entry
pub async fn set_metadata(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO metadata (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_metadata(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value.flatten())
}
