//! Bootstrap configuration and path resolution
//!
//! Settings come from a single TOML file. Every key has a built-in default,
//! so an empty file (or no file at all) yields a runnable configuration.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "DEMON_CONFIG";
/// Environment variable naming the output store
pub const ENV_DATABASE: &str = "DEMON_DATABASE";
/// Environment variable naming the decoded record tree
pub const ENV_SOURCE_ROOT: &str = "DEMON_SOURCE_ROOT";
/// Environment variable naming the type-definition dump
pub const ENV_SCHEMA: &str = "DEMON_SCHEMA";

const APP_DIR: &str = "database-demon";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Output SQLite store
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root of the decoded record tree
    #[serde(default)]
    pub source_root: Option<PathBuf>,

    /// Type-definition dump used to build the registry
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    /// Explicit data-source revision (skips revision file detection)
    #[serde(default)]
    pub revision: Option<String>,

    /// File holding the data-source revision
    #[serde(default)]
    pub revision_file: Option<PathBuf>,

    /// Reject duplicate location ids and fail the run on a low success rate
    #[serde(default)]
    pub strict: bool,

    /// Records per committed transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Success rate below which the run is reported with warnings
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Maximum error samples kept per run
    #[serde(default = "default_error_sample_limit")]
    pub error_sample_limit: usize,

    /// Row limit for top-N analytics
    #[serde(default = "default_top_limit")]
    pub top_limit: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Location manifest settings (optional)
    #[serde(default)]
    pub manifest: Option<ManifestConfig>,

    /// Extraction jobs; [`default_jobs`] when empty
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Where the location manifest lives and how its records are laid out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Manifest path relative to the source root
    #[serde(default = "default_manifest_path")]
    pub path: String,

    /// List field holding the location records
    #[serde(default = "default_manifest_list_field")]
    pub list_field: String,

    /// Numeric id field of a location record
    #[serde(default = "default_manifest_id_field")]
    pub id_field: String,

    /// Path field of a location record
    #[serde(default = "default_manifest_path_field")]
    pub path_field: String,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            path: default_manifest_path(),
            list_field: default_manifest_list_field(),
            id_field: default_manifest_id_field(),
            path_field: default_manifest_path_field(),
        }
    }
}

/// One extraction pass over a source prefix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Job name, also used in the suggested store name
    pub name: String,

    /// Source path prefix to enumerate
    pub prefix: String,

    /// Accepted file extensions (without dot); empty accepts all
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Type names kept by this job (a record matches when its type or an
    /// ancestor is listed); empty keeps every resolvable record
    #[serde(default)]
    pub root_types: Vec<String>,
}

impl JobConfig {
    /// Whether `path` carries one of the accepted extensions
    pub fn accepts_path(&self, path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_min_success_rate() -> f64 {
    0.95
}

fn default_error_sample_limit() -> usize {
    50
}

fn default_top_limit() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_manifest_path() -> String {
    "TemplateManifest.xml".to_string()
}

fn default_manifest_list_field() -> String {
    "m_serializedTemplates".to_string()
}

fn default_manifest_id_field() -> String {
    "m_id".to_string()
}

fn default_manifest_path_field() -> String {
    "m_filename".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["xml".to_string()]
}

/// Jobs used when the config file declares none
pub fn default_jobs() -> Vec<JobConfig> {
    vec![
        JobConfig {
            name: "spells".to_string(),
            prefix: "Spells/".to_string(),
            extensions: default_extensions(),
            root_types: vec!["SpellTemplate".to_string()],
        },
        JobConfig {
            name: "objects".to_string(),
            prefix: "ObjectData/".to_string(),
            extensions: default_extensions(),
            root_types: vec!["WizGameObjectTemplate".to_string()],
        },
    ]
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            source_root: None,
            schema_path: None,
            revision: None,
            revision_file: None,
            strict: false,
            batch_size: default_batch_size(),
            min_success_rate: default_min_success_rate(),
            error_sample_limit: default_error_sample_limit(),
            top_limit: default_top_limit(),
            logging: LoggingConfig::default(),
            manifest: None,
            jobs: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let config: TomlConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the config file chosen by CLI > `DEMON_CONFIG` > platform default.
    ///
    /// An explicitly named file must exist. The platform default is optional
    /// and built-in defaults apply when it is absent.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Self::load(Path::new(&path));
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check value ranges and job declarations
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }

        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(Error::Config(format!(
                "min_success_rate must be within 0.0..=1.0, got {}",
                self.min_success_rate
            )));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.is_empty()
                || !job
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(Error::Config(format!("Invalid job name '{}'", job.name)));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(Error::Config(format!("Duplicate job name '{}'", job.name)));
            }
        }

        Ok(())
    }

    /// Configured jobs, or [`default_jobs`] when none are declared
    pub fn effective_jobs(&self) -> Vec<JobConfig> {
        if self.jobs.is_empty() {
            default_jobs()
        } else {
            self.jobs.clone()
        }
    }
}

/// Resolve a path setting following the priority order:
/// CLI argument, then environment variable, then TOML value, then `fallback`.
pub fn resolve_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
    fallback: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    fallback()
}

/// Platform config file location (`<config dir>/database-demon/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// OS-dependent default data folder for generated stores
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./demon_data"))
}
