//! # DatabaseDemon Common Library
//!
//! Shared code for the extraction and review tools:
//! - Error type
//! - Bootstrap configuration (TOML, environment, defaults)
//! - Store initialization and schema synchronization
//! - Data-source revision detection

pub mod config;
pub mod db;
pub mod error;
pub mod revision;

pub use error::{Error, Result};
