//! Batch writer
//!
//! Writes materialized objects through one writer session. Rows are grouped
//! into transactions of `batch_size` records; each record runs inside its
//! own savepoint so a failed insert (constraint violation, bad value) rolls
//! back only that record's rows. The batch continues and the failure is
//! counted.
//!
//! Connection-level failures (cannot begin, commit, or create a table) are
//! returned as errors and end the run. Rows from batches already committed
//! stay in the store.

use super::layout::{EntityLayout, SatelliteLayout, SqlValue};
use crate::error::Result;
use crate::materializer::{MaterializeStatus, Materialized, MaterializedObject};
use crate::registry::TypeRegistry;
use crate::stats::{ErrorSamples, IssueKind, DEFAULT_SAMPLE_LIMIT};
use crate::value::{TypeTag, Value};
use demon_common::db::SchemaSync;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Default records per transaction
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// One record that could not be written (or read)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub source_path: String,
    pub stage: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteStats {
    pub attempted: usize,
    pub committed: usize,
    pub failed: usize,
    pub satellite_rows: usize,
    pub batches: usize,
    pub tables_created: usize,
    pub errors: ErrorSamples,
    pub failures: Vec<FailureRecord>,
}

impl WriteStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} attempted, {} committed, {} failed, {} satellite rows in {} batches",
            self.attempted, self.committed, self.failed, self.satellite_rows, self.batches
        )
    }
}

pub struct BatchWriter<'r> {
    pool: SqlitePool,
    registry: &'r TypeRegistry,
    run_id: String,
    batch_size: usize,
    replace_existing: bool,
    layouts: HashMap<TypeTag, EntityLayout>,
    tx: Option<Transaction<'static, Sqlite>>,
    /// Records inserted in the open transaction
    pending: usize,
    stats: WriteStats,
}

impl<'r> BatchWriter<'r> {
    pub fn new(pool: SqlitePool, registry: &'r TypeRegistry, run_id: impl Into<String>) -> Self {
        Self {
            pool,
            registry,
            run_id: run_id.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            replace_existing: false,
            layouts: HashMap::new(),
            tx: None,
            pending: 0,
            stats: WriteStats {
                errors: ErrorSamples::with_limit(DEFAULT_SAMPLE_LIMIT),
                ..WriteStats::default()
            },
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.stats.errors = ErrorSamples::with_limit(limit);
        self
    }

    /// Replace rows already stored under the same source path instead of
    /// reporting them as conflicts
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    pub fn stats(&self) -> &WriteStats {
        &self.stats
    }

    /// Write one object and its satellite rows.
    ///
    /// Returns `Err` only for connection-level failures; a record that cannot
    /// be inserted is counted and skipped.
    pub async fn write(
        &mut self,
        source_path: &str,
        obj: &MaterializedObject,
        status: MaterializeStatus,
    ) -> Result<()> {
        self.stats.attempted += 1;

        if !self.layouts.contains_key(&obj.tag) {
            match EntityLayout::derive(self.registry, obj.tag) {
                Ok(layout) => self.create_tables(layout).await?,
                Err(e) => {
                    self.record_failure(source_path, format!("no table layout for {}: {}", obj.type_name, e));
                    return Ok(());
                }
            }
        }
        let Some(layout) = self.layouts.get(&obj.tag) else {
            return Ok(());
        };

        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        let Some(tx) = self.tx.as_mut() else {
            return Ok(());
        };

        sqlx::query("SAVEPOINT record").execute(&mut **tx).await?;

        let is_valid = status == MaterializeStatus::Complete;
        let outcome =
            insert_record(tx, layout, source_path, obj, is_valid, status, &self.run_id, self.replace_existing).await;
        match outcome {
            Ok(satellite_rows) => {
                sqlx::query("RELEASE record").execute(&mut **tx).await?;
                self.pending += 1;
                self.stats.satellite_rows += satellite_rows;
            }
            Err(e) => {
                sqlx::query("ROLLBACK TO record").execute(&mut **tx).await?;
                sqlx::query("RELEASE record").execute(&mut **tx).await?;
                self.record_failure(source_path, e.to_string());
            }
        }

        if self.pending >= self.batch_size {
            self.commit().await?;
        }

        Ok(())
    }

    /// Commit the open batch and return the final counts
    pub async fn finish(mut self) -> Result<WriteStats> {
        self.commit().await?;
        info!("Write finished: {}", self.stats.display_string());
        Ok(self.stats)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            self.stats.committed += self.pending;
            self.stats.batches += 1;
            debug!("Committed batch of {} records", self.pending);
            self.pending = 0;
        }
        Ok(())
    }

    /// Create (or sync) the tables of a new entity type.
    ///
    /// DDL goes through the pool, so the open batch is committed first.
    async fn create_tables(&mut self, layout: EntityLayout) -> Result<()> {
        self.commit().await?;

        SchemaSync::ensure_table(&self.pool, &layout.table).await?;
        // Parents first so child foreign keys resolve
        let satellites = layout.all_satellites();
        for satellite in &satellites {
            SchemaSync::ensure_table(&self.pool, &satellite.table).await?;
        }
        sqlx::query(&layout.lookup_view_sql()).execute(&self.pool).await?;

        info!(
            "Table '{}' ready for {} ({} columns, {} satellites)",
            layout.table_name(),
            layout.type_name,
            layout.table.columns.len(),
            satellites.len()
        );

        self.stats.tables_created += 1 + satellites.len();
        self.layouts.insert(layout.tag, layout);
        Ok(())
    }

    fn record_failure(&mut self, source_path: &str, message: String) {
        warn!("Failed to write {}: {}", source_path, message);
        self.stats.failed += 1;
        self.stats
            .errors
            .push(IssueKind::Persistence, source_path, message.clone());
        self.stats.failures.push(FailureRecord {
            source_path: source_path.to_string(),
            stage: IssueKind::Persistence,
            message,
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_record(
    tx: &mut Transaction<'static, Sqlite>,
    layout: &EntityLayout,
    source_path: &str,
    obj: &MaterializedObject,
    is_valid: bool,
    status: MaterializeStatus,
    run_id: &str,
    replace_existing: bool,
) -> std::result::Result<usize, sqlx::Error> {
    if replace_existing {
        sqlx::query(&layout.delete_sql)
            .bind(source_path)
            .execute(&mut **tx)
            .await?;
    }

    let values = layout.row_values(source_path, obj, is_valid, status.as_str(), run_id);
    bind_values(sqlx::query(&layout.insert_sql), &values)
        .execute(&mut **tx)
        .await?;

    // (satellite, key of the owning row, list value)
    let mut pending: Vec<(&SatelliteLayout, Vec<SqlValue>, Option<&Materialized>)> = layout
        .satellites
        .iter()
        .map(|s| (s, vec![SqlValue::Text(source_path.to_string())], obj.get(&s.field)))
        .collect();

    let mut rows = 0;
    while let Some((satellite, key, value)) = pending.pop() {
        for (seq, element) in list_elements(value).into_iter().enumerate() {
            let mut row_key = key.clone();
            row_key.push(SqlValue::Int(seq as i64));

            let mut values = row_key.clone();
            values.extend(satellite.row_values(element));
            bind_values(sqlx::query(&satellite.insert_sql), &values)
                .execute(&mut **tx)
                .await?;
            rows += 1;

            if let Some(element_obj) = element.as_object() {
                for child in &satellite.children {
                    pending.push((child, row_key.clone(), element_obj.get(&child.field)));
                }
            }
        }
    }

    Ok(rows)
}

fn list_elements(value: Option<&Materialized>) -> Vec<&Materialized> {
    match value {
        Some(Materialized::List(items)) => items.iter().collect(),
        None | Some(Materialized::Value(Value::Null)) => Vec::new(),
        // A list field that fell back to a non-list value keeps it as one row
        Some(other) => vec![other],
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}
