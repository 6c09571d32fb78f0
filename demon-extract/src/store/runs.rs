//! Run bookkeeping
//!
//! Each job run gets an `ingest_runs` row on start and its final counts on
//! finish. Records that failed to decode or write are kept in
//! `ingest_failures` so a later review can list them.

use super::writer::FailureRecord;
use crate::error::Result;
use crate::stats::RunStatistics;
use sqlx::SqlitePool;
use tracing::debug;

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

pub async fn start_run(pool: &SqlitePool, run_id: &str, job: &str, revision: Option<&str>) -> Result<()> {
    sqlx::query("INSERT INTO ingest_runs (run_id, job, revision) VALUES (?, ?, ?)")
        .bind(run_id)
        .bind(job)
        .bind(revision)
        .execute(pool)
        .await?;
    debug!("Started run {} for job '{}'", run_id, job);
    Ok(())
}

/// Counts written when a run ends
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCounts {
    pub committed: usize,
    pub write_failures: usize,
}

pub async fn finish_run(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    stats: &RunStatistics,
    counts: RunCounts,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE ingest_runs
        SET status = ?, processed = ?, succeeded = ?, failed = ?, skipped = ?,
            committed = ?, write_failures = ?, finished_at = CURRENT_TIMESTAMP
        WHERE run_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(stats.processed as i64)
    .bind(stats.succeeded as i64)
    .bind(stats.failed as i64)
    .bind(stats.skipped as i64)
    .bind(counts.committed as i64)
    .bind(counts.write_failures as i64)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Store failure rows in one transaction
pub async fn record_failures(pool: &SqlitePool, run_id: &str, failures: &[FailureRecord]) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for failure in failures {
        sqlx::query("INSERT INTO ingest_failures (run_id, source_path, stage, message) VALUES (?, ?, ?, ?)")
            .bind(run_id)
            .bind(&failure.source_path)
            .bind(failure.stage.as_str())
            .bind(&failure.message)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    debug!("Recorded {} failures for run {}", failures.len(), run_id);
    Ok(())
}
