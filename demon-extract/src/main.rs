//! demon-extract - extract typed game records into a SQLite store
//!
//! Loads the type-definition dump, builds the template location index from
//! the manifest, then runs each configured job over the decoded record tree.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use demon_common::config::{
    default_data_dir, resolve_path, ManifestConfig, TomlConfig, ENV_DATABASE, ENV_SCHEMA, ENV_SOURCE_ROOT,
};
use demon_common::db::{init_database, set_metadata};
use demon_common::revision::{check_schema_revision, detect_revision, suggest_database_name};
use demon_extract::pipeline::{location_failure_is_fatal, Pipeline, PipelineOptions};
use demon_extract::report::{RunOutcome, RunReport};
use demon_extract::schema_loader::load_schemas;
use demon_extract::source::DirectorySource;
use demon_extract::TypeRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for demon-extract
#[derive(Parser, Debug)]
#[command(name = "demon-extract")]
#[command(about = "Extract typed game records into a queryable SQLite store")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/database-demon/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output store
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Root of the decoded record tree
    #[arg(short, long)]
    source_root: Option<PathBuf>,

    /// Type-definition dump
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Data-source revision (overrides the revision file)
    #[arg(short, long)]
    revision: Option<String>,

    /// Run only the named job (repeatable)
    #[arg(short, long = "job")]
    jobs: Vec<String>,

    /// Reject duplicate location ids and fail below the success threshold
    #[arg(long)]
    strict: bool,

    /// Records per committed transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Overwrite rows already stored for the same source path
    #[arg(long)]
    replace: bool,

    /// Skip building the location index
    #[arg(long)]
    skip_locations: bool,

    /// Write the report to this file instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if args.strict {
        config.strict = true;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    init_tracing(&config)?;

    let source_root = resolve_path(
        args.source_root.as_deref(),
        ENV_SOURCE_ROOT,
        config.source_root.as_deref(),
        || default_data_dir().join("source"),
    );
    let schema_path = resolve_path(args.schema.as_deref(), ENV_SCHEMA, config.schema_path.as_deref(), || {
        source_root.join("types.json")
    });

    let revision_file = config
        .revision_file
        .clone()
        .unwrap_or_else(|| source_root.join("revision.dat"));
    let revision = detect_revision(
        args.revision.as_deref().or(config.revision.as_deref()),
        Some(&revision_file),
    )?;

    let database_path = resolve_path(args.database.as_deref(), ENV_DATABASE, config.database_path.as_deref(), || {
        default_data_dir().join(suggest_database_name(revision.as_deref(), "demon"))
    });

    info!("Source root: {}", source_root.display());
    info!("Type dump: {}", schema_path.display());
    info!("Store: {}", database_path.display());

    check_schema_revision(revision.as_deref(), &schema_path);
    let registry = TypeRegistry::from_definitions(
        load_schemas(&schema_path).with_context(|| format!("Failed to load {}", schema_path.display()))?,
    );
    info!("Type registry: {} types", registry.len());

    let source = DirectorySource::open(&source_root)
        .with_context(|| format!("Cannot open source root {}", source_root.display()))?;

    let pool = init_database(&database_path)
        .await
        .context("Failed to open the output store")?;
    if let Some(rev) = &revision {
        set_metadata(&pool, "revision", rev).await?;
    }
    set_metadata(&pool, "schema_dump", &schema_path.to_string_lossy()).await?;
    set_metadata(&pool, "creator_version", env!("CARGO_PKG_VERSION")).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut options = PipelineOptions::from_config(&config, revision.clone());
    options.replace_existing = args.replace;
    let pipeline = Pipeline::new(&source, &registry, pool.clone(), options).with_cancellation(cancel.clone());

    let mut report = RunReport::new(
        revision.clone(),
        database_path.display().to_string(),
        config.strict,
        config.min_success_rate,
    );

    if !args.skip_locations {
        let configured = config.manifest.is_some();
        let manifest = config.manifest.clone().unwrap_or_else(ManifestConfig::default);
        match pipeline.build_locations(&manifest).await {
            Ok((_, summary)) => report.locations = Some(summary),
            Err(e) if !location_failure_is_fatal(&e, configured, config.strict) => {
                warn!("Location index skipped: {}", e)
            }
            Err(e) => return Err(e).context("Failed to build the location index"),
        }
    }

    let jobs: Vec<_> = config
        .effective_jobs()
        .into_iter()
        .filter(|job| args.jobs.is_empty() || args.jobs.contains(&job.name))
        .collect();
    if jobs.is_empty() {
        warn!("No jobs selected");
    }

    for job in &jobs {
        if cancel.is_cancelled() {
            break;
        }
        let job_report = pipeline
            .run_job(job)
            .await
            .with_context(|| format!("Job '{}' failed", job.name))?;
        report.jobs.push(job_report);
    }

    report.finish();
    pool.close().await;

    write_report(&report, args.report.as_deref(), args.json)?;

    let outcome = report.outcome();
    info!("Run finished: {}", outcome.as_str());
    Ok(match outcome {
        RunOutcome::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Cannot create log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn write_report(report: &RunReport, path: Option<&Path>, json: bool) -> Result<()> {
    let text = if json {
        serde_json::to_string_pretty(report)?
    } else {
        report.render_text()
    };

    match path {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("Cannot write report {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM; the current record finishes and
/// committed rows stay
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping after the current record"),
        _ = terminate => info!("Received terminate signal, stopping after the current record"),
    }
    token.cancel();
}
