//! Error types for the extraction pipeline
//!
//! Only [`ExtractError`] aborts a run. The per-record and per-field errors
//! below are caught at their boundary and folded into statistics.

use thiserror::Error;

/// Result type for run-level operations
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Run-level failures (resource acquisition and configuration)
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Common(#[from] demon_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The type-definition dump could not be read or parsed
    #[error("Schema source error: {0}")]
    SchemaLoad(String),

    /// The record source could not be opened or enumerated
    #[error("Record source error: {0}")]
    Source(#[from] SourceError),

    /// The location manifest does not exist in the source
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    /// The location manifest is unreadable or malformed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Duplicate location ids under the strict duplicate policy
    #[error("Duplicate location ids: {0:?}")]
    DuplicateIds(Vec<i64>),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure to fetch or decode one record from a source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Cannot decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One field (or list element) that could not be coerced to its declared type
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldConversionError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("integer {0} out of range")]
    OutOfRange(String),

    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),
}
