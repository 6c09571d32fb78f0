//! Data-source revision detection
//!
//! Stores are named after the revision of the data they were extracted from,
//! e.g. `r777820_spells.db`.

use crate::{Error, Result};
use std::path::Path;
use tracing::{info, warn};

/// Revision used when none can be detected
pub const UNKNOWN_REVISION: &str = "unknown";

/// Normalize a raw revision string: trimmed, `r` prefixed.
///
/// Returns `None` for blank input.
pub fn normalize_revision(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('r') {
        Some(trimmed.to_string())
    } else {
        Some(format!("r{}", trimmed))
    }
}

/// Read the revision from a revision file (first non-blank line).
///
/// A missing or blank file is not an error; it yields `Ok(None)`.
pub fn read_revision_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        warn!("Revision file not found at {}", path.display());
        return Ok(None);
    }

    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let revision = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .and_then(normalize_revision);

    match &revision {
        Some(rev) => info!("Detected data-source revision: {}", rev),
        None => warn!("Empty revision file: {}", path.display()),
    }

    Ok(revision)
}

/// Pick the revision: explicit value first, then the revision file
pub fn detect_revision(explicit: Option<&str>, revision_file: Option<&Path>) -> Result<Option<String>> {
    if let Some(raw) = explicit {
        return normalize_revision(raw)
            .map(Some)
            .ok_or_else(|| Error::Config("Configured revision is blank".to_string()));
    }

    match revision_file {
        Some(path) => read_revision_file(path),
        None => Ok(None),
    }
}

/// Suggested store file name for a revision and job, e.g. `r777820_spells.db`
pub fn suggest_database_name(revision: Option<&str>, job: &str) -> String {
    format!("{}_{}.db", revision.unwrap_or(UNKNOWN_REVISION), job)
}

/// Warn when the schema dump's file name does not mention the revision.
///
/// Returns whether the names agree. Never fails: a mismatched dump may
/// still describe the data well enough to extract.
pub fn check_schema_revision(revision: Option<&str>, schema_path: &Path) -> bool {
    let Some(revision) = revision else {
        warn!("Cannot determine revision for schema compatibility check");
        return true;
    };

    let file_name = schema_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if file_name.contains(revision) {
        info!("Schema dump {} matches revision {}", file_name, revision);
        true
    } else {
        warn!(
            "Schema dump '{}' may not match revision {}; check that it was dumped from the same build",
            file_name, revision
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_normalize_revision() {
        assert_eq!(normalize_revision("777820"), Some("r777820".to_string()));
        assert_eq!(normalize_revision("  r777820\n"), Some("r777820".to_string()));
        assert_eq!(normalize_revision("   "), None);
    }

    #[test]
    fn test_read_revision_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file).unwrap();
        writeln!(file, "777820").unwrap();

        let revision = read_revision_file(file.path()).unwrap();
        assert_eq!(revision, Some("r777820".to_string()));
    }

    #[test]
    fn test_missing_revision_file_is_none() {
        let revision = read_revision_file(Path::new("/nonexistent/revision.dat")).unwrap();
        assert!(revision.is_none());
    }

    #[test]
    fn test_explicit_revision_wins() {
        let revision = detect_revision(Some("123"), Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(revision, Some("r123".to_string()));
        assert!(detect_revision(Some(" "), None).is_err());
    }

    #[test]
    fn test_suggest_database_name() {
        assert_eq!(suggest_database_name(Some("r777820"), "spells"), "r777820_spells.db");
        assert_eq!(suggest_database_name(None, "objects"), "unknown_objects.db");
    }

    #[test]
    fn test_check_schema_revision() {
        assert!(check_schema_revision(Some("r777820"), Path::new("/dumps/r777820_types.json")));
        assert!(!check_schema_revision(Some("r777820"), Path::new("/dumps/types.json")));
        assert!(check_schema_revision(None, Path::new("/dumps/types.json")));
    }
}
