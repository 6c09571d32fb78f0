//! Extraction pipeline
//!
//! One job = enumerate a source prefix, materialize each record, write the
//! objects. Records are independent: a decode failure, an unknown type or a
//! failed insert only affects that record.
//!
//! The writer session is exclusive while a batch is open, so run bookkeeping
//! happens before the first write and after the final commit.

use crate::error::{ExtractError, Result, SourceError};
use crate::location::{DuplicatePolicy, IndexStats, LocationIndex, ManifestLayout};
use crate::materializer::{Materializer, DEFAULT_MAX_DEPTH};
use crate::registry::TypeRegistry;
use crate::source::RecordSource;
use crate::stats::{IssueKind, RunStatistics, DEFAULT_SAMPLE_LIMIT};
use crate::store::{
    finish_run, record_failures, start_run, write_locations, BatchWriter, FailureRecord, RunCounts, RunStatus,
    WriteStats, DEFAULT_BATCH_SIZE,
};
use crate::value::{TypeTag, Value};
use demon_common::config::{JobConfig, ManifestConfig, TomlConfig};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub strict: bool,
    pub sample_limit: usize,
    pub max_depth: usize,
    pub revision: Option<String>,
    pub replace_existing: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strict: false,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
            revision: None,
            replace_existing: false,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &TomlConfig, revision: Option<String>) -> Self {
        Self {
            batch_size: config.batch_size,
            strict: config.strict,
            sample_limit: config.error_sample_limit,
            revision,
            ..Self::default()
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    pub run_id: String,
    /// Paths under the job prefix
    pub listed: usize,
    /// Paths with an accepted extension
    pub considered: usize,
    pub materialize: RunStatistics,
    pub write: WriteStats,
    pub cancelled: bool,
}

impl JobReport {
    /// Committed share of records that were not skipped (1.0 when none)
    pub fn success_rate(&self) -> f64 {
        let considered = self.materialize.processed.saturating_sub(self.materialize.skipped);
        if considered == 0 {
            1.0
        } else {
            self.write.committed as f64 / considered as f64
        }
    }

    pub fn has_failures(&self) -> bool {
        self.materialize.failed > 0 || self.write.failed > 0
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}: {}; {} ({:.1}% committed)",
            self.job,
            self.materialize.display_string(),
            self.write.display_string(),
            self.success_rate() * 100.0
        )
    }
}

/// Location index as built and stored
#[derive(Debug, Clone, Serialize)]
pub struct LocationSummary {
    pub written: usize,
    pub stats: IndexStats,
}

/// Whether a location index failure must end the run.
///
/// Only a missing manifest at the default location is tolerated, and only
/// outside strict mode. Duplicate ids, malformed manifests and store errors
/// always propagate.
pub fn location_failure_is_fatal(err: &ExtractError, manifest_configured: bool, strict: bool) -> bool {
    manifest_configured || strict || !matches!(err, ExtractError::ManifestNotFound(_))
}

pub struct Pipeline<'a> {
    source: &'a dyn RecordSource,
    registry: &'a TypeRegistry,
    pool: SqlitePool,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        registry: &'a TypeRegistry,
        pool: SqlitePool,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            registry,
            pool,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between records once the token is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn materializer(&self) -> Materializer<'a> {
        Materializer::new(self.registry)
            .with_sample_limit(self.options.sample_limit)
            .with_max_depth(self.options.max_depth)
    }

    /// Decode the location manifest, build the index and store it
    pub async fn build_locations(&self, manifest: &ManifestConfig) -> Result<(LocationIndex, LocationSummary)> {
        let value = self
            .source
            .get(&manifest.path)
            .map_err(|e| match e {
                SourceError::NotFound(path) => ExtractError::ManifestNotFound(path),
                other => ExtractError::Manifest(other.to_string()),
            })?;

        let result = self.materializer().materialize_at(&manifest.path, &value);
        let obj = result.into_object().ok_or_else(|| {
            ExtractError::Manifest(format!("{} does not decode to a registered type", manifest.path))
        })?;

        let policy = if self.options.strict {
            DuplicatePolicy::Reject
        } else {
            DuplicatePolicy::LastWriteWins
        };
        let index = LocationIndex::from_manifest(&obj, &ManifestLayout::from(manifest), policy)?;
        let written = write_locations(&self.pool, &index).await?;

        let summary = LocationSummary {
            written,
            stats: index.stats().clone(),
        };
        Ok((index, summary))
    }

    /// Run one job to completion (or cancellation)
    pub async fn run_job(&self, job: &JobConfig) -> Result<JobReport> {
        let listed = self.source.list_paths(&job.prefix)?;
        let paths: Vec<String> = listed.iter().filter(|p| job.accepts_path(p)).cloned().collect();
        let roots = self.root_tags(job)?;

        let run_id = Uuid::new_v4().to_string();
        start_run(&self.pool, &run_id, &job.name, self.options.revision.as_deref()).await?;
        info!(
            "Job '{}' ({}): {} of {} paths under '{}'",
            job.name,
            run_id,
            paths.len(),
            listed.len(),
            job.prefix
        );

        let pass = match self.process(&run_id, &paths, &roots).await {
            Ok(pass) => pass,
            Err(e) => {
                if let Err(finish_err) = finish_run(
                    &self.pool,
                    &run_id,
                    RunStatus::Failed,
                    &RunStatistics::default(),
                    RunCounts::default(),
                )
                .await
                {
                    warn!("Could not mark run {} as failed: {}", run_id, finish_err);
                }
                return Err(e);
            }
        };

        let mut failures = pass.failures;
        failures.extend(pass.write.failures.iter().cloned());
        record_failures(&self.pool, &run_id, &failures).await?;

        let status = if pass.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        finish_run(
            &self.pool,
            &run_id,
            status,
            &pass.stats,
            RunCounts {
                committed: pass.write.committed,
                write_failures: pass.write.failed,
            },
        )
        .await?;

        let report = JobReport {
            job: job.name.clone(),
            run_id,
            listed: listed.len(),
            considered: paths.len(),
            materialize: pass.stats,
            write: pass.write,
            cancelled: pass.cancelled,
        };
        info!("{}", report.display_string());
        Ok(report)
    }

    fn root_tags(&self, job: &JobConfig) -> Result<HashSet<TypeTag>> {
        let mut roots = HashSet::new();
        for name in &job.root_types {
            match self.registry.resolve_by_name(name) {
                Some(tag) => {
                    roots.insert(tag);
                }
                None => warn!("Job '{}': root type '{}' is not in the type registry", job.name, name),
            }
        }
        if !job.root_types.is_empty() && roots.is_empty() {
            return Err(ExtractError::Config(format!(
                "job '{}' names no registered root type",
                job.name
            )));
        }
        Ok(roots)
    }

    async fn process(&self, run_id: &str, paths: &[String], roots: &HashSet<TypeTag>) -> Result<Pass> {
        let materializer = self.materializer();
        let mut writer = BatchWriter::new(self.pool.clone(), self.registry, run_id)
            .with_batch_size(self.options.batch_size)
            .with_sample_limit(self.options.sample_limit)
            .replace_existing(self.options.replace_existing);

        let mut stats = RunStatistics::with_sample_limit(self.options.sample_limit);
        let mut failures = Vec::new();
        let mut cancelled = false;

        for path in paths {
            if self.cancel.is_cancelled() {
                info!("Cancelled after {} records", stats.processed);
                cancelled = true;
                break;
            }

            let value = match self.source.get(path) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping unreadable record {}: {}", path, e);
                    stats.record_decode_failure(path, e.to_string());
                    failures.push(FailureRecord {
                        source_path: path.clone(),
                        stage: IssueKind::Decode,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let Value::Record(record) = &value else {
                debug!("{} is not a tagged record; skipped", path);
                stats.record_skip();
                continue;
            };
            if let Some(tag) = materializer.resolve(&record.type_ref) {
                if !self.registry.is_any_of(tag, roots) {
                    stats.record_skip();
                    continue;
                }
            }

            let result = materializer.materialize_at(path, &value);
            if let Some(obj) = result.object() {
                writer.write(path, obj, result.status).await?;
            }
            stats.merge(result.stats);
        }

        let write = writer.finish().await?;
        Ok(Pass {
            stats,
            write,
            failures,
            cancelled,
        })
    }
}

/// Counts of one pass over a job's paths
struct Pass {
    stats: RunStatistics,
    write: WriteStats,
    failures: Vec<FailureRecord>,
    cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldDecl, FieldType, SchemaDefinition};
    use crate::source::MemorySource;
    use crate::value::TaggedRecord;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        demon_common::db::init_schema(&pool).await.unwrap();
        pool
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::from_definitions(vec![
            SchemaDefinition::new(1, "class CoreTemplate").with_field("m_id", FieldDecl::of(FieldType::Int)),
            SchemaDefinition::new(2, "class SpellTemplate")
                .with_ancestors(vec![1])
                .with_field("m_name", FieldDecl::of(FieldType::String)),
            SchemaDefinition::new(3, "class SoundTemplate")
                .with_ancestors(vec![1])
                .with_field("m_file", FieldDecl::of(FieldType::String)),
        ])
    }

    fn job() -> JobConfig {
        JobConfig {
            name: "spells".to_string(),
            prefix: "Spells/".to_string(),
            extensions: vec!["xml".to_string()],
            root_types: vec!["SpellTemplate".to_string()],
        }
    }

    #[test]
    fn test_only_missing_default_manifest_is_tolerated() {
        let missing = ExtractError::ManifestNotFound("TemplateManifest.xml".to_string());
        assert!(!location_failure_is_fatal(&missing, false, false));
        assert!(location_failure_is_fatal(&missing, true, false));
        assert!(location_failure_is_fatal(&missing, false, true));

        let duplicates = ExtractError::DuplicateIds(vec![12]);
        assert!(location_failure_is_fatal(&duplicates, false, false));
        assert!(location_failure_is_fatal(&duplicates, false, true));

        let malformed = ExtractError::Manifest("no list field".to_string());
        assert!(location_failure_is_fatal(&malformed, false, false));
    }

    #[tokio::test]
    async fn test_strict_duplicates_fail_with_default_manifest() {
        let entry = |id: i64, path: &str| -> Value {
            TaggedRecord::with_tag(101)
                .field("m_id", Value::Int(id))
                .field("m_filename", Value::from(path))
                .into()
        };
        let registry = TypeRegistry::from_definitions(vec![
            SchemaDefinition::new(100, "class TemplateManifest").with_field(
                "m_serializedTemplates",
                FieldDecl::of(FieldType::List(Box::new(FieldType::Object(Some("TemplateLocation".into()))))),
            ),
            SchemaDefinition::new(101, "class TemplateLocation")
                .with_field("m_id", FieldDecl::of(FieldType::Int))
                .with_field("m_filename", FieldDecl::of(FieldType::String)),
        ]);
        let source = MemorySource::new().with(
            "TemplateManifest.xml",
            TaggedRecord::with_tag(100)
                .field(
                    "m_serializedTemplates",
                    Value::List(vec![entry(12, "Spells/A.xml"), entry(12, "Spells/B.xml")]),
                )
                .into(),
        );
        let options = PipelineOptions {
            strict: true,
            ..PipelineOptions::default()
        };
        let pipeline = Pipeline::new(&source, &registry, memory_pool().await, options);

        let err = pipeline.build_locations(&ManifestConfig::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::DuplicateIds(_)));
        assert!(location_failure_is_fatal(&err, false, true));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_distinguished() {
        let source = MemorySource::new();
        let registry = registry();
        let pipeline = Pipeline::new(&source, &registry, memory_pool().await, PipelineOptions::default());

        let err = pipeline.build_locations(&ManifestConfig::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::ManifestNotFound(_)));
        assert!(!location_failure_is_fatal(&err, false, false));
    }

    #[tokio::test]
    async fn test_run_job_isolates_bad_records() {
        let source = MemorySource::new()
            .with(
                "Spells/A.xml",
                TaggedRecord::with_tag(2).field("m_name", "A".into()).into(),
            )
            .with(
                "Spells/B.xml",
                TaggedRecord::with_tag(2).field("m_name", Value::Int(5)).into(),
            )
            .with("Spells/Sound.xml", TaggedRecord::with_tag(3).into())
            .with("Spells/Unknown.xml", TaggedRecord::with_tag(404).into())
            .with("Spells/readme.txt", Value::from("not a record"))
            .with("Other/C.xml", TaggedRecord::with_tag(2).into());

        let registry = registry();
        let pool = memory_pool().await;
        let pipeline = Pipeline::new(&source, &registry, pool.clone(), PipelineOptions::default());

        let report = pipeline.run_job(&job()).await.unwrap();

        assert_eq!(report.listed, 5);
        assert_eq!(report.considered, 4);
        assert_eq!(report.materialize.processed, 4);
        // SoundTemplate filtered, 404 unknown
        assert_eq!(report.materialize.skipped, 2);
        assert_eq!(report.materialize.succeeded, 1);
        assert_eq!(report.materialize.failed, 1);
        assert_eq!(report.write.committed, 2);
        assert!(!report.cancelled);

        let (status, committed): (String, i64) =
            sqlx::query_as("SELECT status, committed FROM ingest_runs WHERE run_id = ?")
                .bind(&report.run_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "completed");
        assert_eq!(committed, 2);
    }

    #[tokio::test]
    async fn test_unresolvable_root_types_are_config_error() {
        let source = MemorySource::new();
        let registry = registry();
        let pipeline = Pipeline::new(&source, &registry, memory_pool().await, PipelineOptions::default());

        let mut job = job();
        job.root_types = vec!["NoSuchTemplate".to_string()];
        assert!(matches!(pipeline.run_job(&job).await, Err(ExtractError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_nothing_half_written() {
        let mut source = MemorySource::new();
        for i in 0..5 {
            source.insert(
                format!("Spells/S{}.xml", i),
                TaggedRecord::with_tag(2).field("m_name", "x".into()).into(),
            );
        }
        let registry = registry();
        let pool = memory_pool().await;
        let token = CancellationToken::new();
        token.cancel();

        let pipeline = Pipeline::new(&source, &registry, pool.clone(), PipelineOptions::default())
            .with_cancellation(token);
        let report = pipeline.run_job(&job()).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.write.committed, 0);
        let status: String = sqlx::query_scalar("SELECT status FROM ingest_runs WHERE run_id = ?")
            .bind(&report.run_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "cancelled");
    }
}
