//! Record sources
//!
//! The pipeline reads decoded records through [`RecordSource`]. Decoding of
//! the game's binary archives happens upstream; the on-disk source here
//! reads JSON dumps mirrored under a root directory, one file per record
//! (`Spells/Fire/Meteor.xml` is stored as `Spells/Fire/Meteor.xml.json`).

use crate::error::SourceError;
use crate::value::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const DUMP_SUFFIX: &str = ".json";

/// Read access to decoded records by source path
pub trait RecordSource: Send + Sync {
    /// Fetch and decode one record
    fn get(&self, path: &str) -> Result<Value, SourceError>;

    /// All record paths starting with `prefix`, sorted
    fn list_paths(&self, prefix: &str) -> Result<Vec<String>, SourceError>;
}

/// JSON dumps mirrored under a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SourceError::NotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dump_file(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        let dumped = self.root.join(format!("{}{}", relative, DUMP_SUFFIX));
        if dumped.is_file() {
            return Some(dumped);
        }
        let plain = self.root.join(relative);
        plain.is_file().then_some(plain)
    }
}

impl RecordSource for DirectorySource {
    fn get(&self, path: &str) -> Result<Value, SourceError> {
        let file = self
            .dump_file(path)
            .ok_or_else(|| SourceError::NotFound(path.to_string()))?;
        let text = std::fs::read_to_string(&file).map_err(|source| SourceError::Io {
            path: path.to_string(),
            source,
        })?;
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| SourceError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Value::from_json(&json))
    }

    fn list_paths(&self, prefix: &str) -> Result<Vec<String>, SourceError> {
        let mut paths = Vec::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| SourceError::Io {
                path: self.root.display().to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let Some(record_path) = relative.strip_suffix(DUMP_SUFFIX) else {
                continue;
            };
            if record_path.starts_with(prefix) {
                paths.push(record_path.to_string());
            }
        }

        paths.sort();
        debug!("{} record paths under '{}'", paths.len(), prefix);
        Ok(paths)
    }
}

/// In-memory records, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: BTreeMap<String, Value>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.records.insert(path.into(), value);
    }

    pub fn with(mut self, path: impl Into<String>, value: Value) -> Self {
        self.insert(path, value);
        self
    }
}

impl RecordSource for MemorySource {
    fn get(&self, path: &str) -> Result<Value, SourceError> {
        self.records
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))
    }

    fn list_paths(&self, prefix: &str) -> Result<Vec<String>, SourceError> {
        Ok(self
            .records
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }
}
