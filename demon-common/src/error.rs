//! Common error types for DatabaseDemon

use thiserror::Error;

/// Common result type for DatabaseDemon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the extraction and review tools
#[derive(Error, Debug)]
pub enum Error {
    /// Store operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (identifier, path, parameter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
