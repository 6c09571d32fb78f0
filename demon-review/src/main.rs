//! demon-review - read-only inspection of a store written by demon-extract

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use demon_common::config::{default_data_dir, resolve_path, TomlConfig, ENV_DATABASE};
use demon_common::db::get_metadata;
use demon_common::revision::suggest_database_name;
use demon_review::analytics;
use demon_review::db::{connect_readonly, list_tables};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "demon-review")]
#[command(about = "Inspect an extracted game-data store")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/database-demon/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store to inspect
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tables with row counts
    Tables,
    /// Store metadata, entity validity and location summaries
    Summary,
    /// Template locations per school category
    Categories,
    /// Entities of one table with the most nested rows
    Top {
        table: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Recent extraction runs
    Runs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Failures recorded for one run
    Failures { run_id: String },
}

#[derive(Serialize)]
struct Summary {
    revision: Option<String>,
    creator_version: Option<String>,
    entities: Vec<analytics::EntityValidity>,
    file_types: Vec<analytics::FileTypeRow>,
    validation: analytics::ValidationSummary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TomlConfig::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with_writer(std::io::stderr)
        .init();

    let db_path = resolve_path(cli.database.as_deref(), ENV_DATABASE, config.database_path.as_deref(), || {
        default_data_dir().join(suggest_database_name(None, "demon"))
    });
    info!("Store: {}", db_path.display());

    let pool = match connect_readonly(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open store: {}", e);
            return Err(e);
        }
    };

    let result = run(&pool, cli.command, cli.json, config.top_limit).await;
    pool.close().await;
    result
}

async fn run(pool: &SqlitePool, command: Command, json: bool, top_limit: usize) -> Result<()> {
    match command {
        Command::Tables => {
            let tables = list_tables(pool).await?;
            emit(json, &tables, || {
                tables
                    .iter()
                    .map(|t| format!("{:<40} {:>10}", t.name, t.row_count))
                    .collect()
            })
        }
        Command::Summary => {
            let summary = Summary {
                revision: get_metadata(pool, "revision").await?,
                creator_version: get_metadata(pool, "creator_version").await?,
                entities: analytics::validity_summary(pool).await?,
                file_types: analytics::file_type_summary(pool).await?,
                validation: analytics::validation_summary(pool).await?,
            };
            emit(json, &summary, || render_summary(&summary))
        }
        Command::Categories => {
            let counts = analytics::counts_by_category(pool).await?;
            emit(json, &counts, || {
                counts
                    .iter()
                    .map(|c| format!("{:<12} {:>8}", c.category, c.count))
                    .collect()
            })
        }
        Command::Top { table, limit } => {
            let limit = limit.unwrap_or(top_limit) as i64;
            let top = analytics::top_entities(pool, &table, limit).await?;
            emit(json, &top, || {
                top.iter()
                    .map(|t| format!("{:>6}  {}", t.nested_rows, t.source_path))
                    .collect()
            })
        }
        Command::Runs { limit } => {
            let runs = analytics::run_history(pool, limit as i64).await?;
            emit(json, &runs, || {
                runs.iter()
                    .map(|r| {
                        format!(
                            "{}  {:<10} {:<10} processed={} committed={} write_failures={}  {}",
                            r.run_id,
                            r.job,
                            r.status,
                            r.processed,
                            r.committed,
                            r.write_failures,
                            r.started_at
                        )
                    })
                    .collect()
            })
        }
        Command::Failures { run_id } => {
            let failures = analytics::run_failures(pool, &run_id).await?;
            emit(json, &failures, || {
                failures
                    .iter()
                    .map(|f| {
                        format!(
                            "[{}] {}: {}",
                            f.stage,
                            f.source_path.as_deref().unwrap_or("-"),
                            f.message
                        )
                    })
                    .collect()
            })
        }
    }
}

fn render_summary(summary: &Summary) -> Vec<String> {
    let mut lines = vec![
        format!("Revision: {}", summary.revision.as_deref().unwrap_or("unknown")),
        format!(
            "Written by: demon-extract {}",
            summary.creator_version.as_deref().unwrap_or("?")
        ),
        String::new(),
        "Entities:".to_string(),
    ];
    for e in &summary.entities {
        lines.push(format!(
            "  {:<36} {:>8} rows, {:>8} partial ({:.1}% valid)",
            e.table,
            e.total,
            e.partial,
            e.valid_percentage()
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "Locations: {} total, {} valid, {} invalid ({:.2}%)",
        summary.validation.total_templates,
        summary.validation.valid_templates,
        summary.validation.invalid_templates,
        summary.validation.validation_success_rate
    ));
    for f in &summary.file_types {
        lines.push(format!(
            "  {:<12} {:>8} ({:.2}% valid)",
            f.file_type, f.template_count, f.valid_percentage
        ));
    }
    lines
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> Vec<String>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        for line in text() {
            println!("{}", line);
        }
    }
    Ok(())
}
