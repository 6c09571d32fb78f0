//! Configuration loading tests
//!
//! Tests that touch DEMON_* environment variables are marked #[serial] so
//! they do not race each other.

use demon_common::config::{resolve_path, TomlConfig, ENV_CONFIG, ENV_DATABASE};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[test]
fn test_load_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        database_path = "/data/out.db"
        min_success_rate = 0.9

        [logging]
        level = "debug"
        "#
    )
    .unwrap();

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.database_path, Some(PathBuf::from("/data/out.db")));
    assert_eq!(config.min_success_rate, 0.9);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.batch_size, 1000);
}

#[test]
fn test_invalid_config_is_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "batch_size = \"many\"").unwrap();
    assert!(TomlConfig::load(file.path()).is_err());

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "batch_size = 0").unwrap();
    assert!(TomlConfig::load(file.path()).is_err());
}

#[test]
fn test_explicit_missing_file_is_error() {
    assert!(TomlConfig::load_or_default(Some(Path::new("/nonexistent/demon.toml"))).is_err());
}

#[test]
#[serial]
fn test_env_config_file_used() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "strict = true").unwrap();

    env::set_var(ENV_CONFIG, file.path());
    let config = TomlConfig::load_or_default(None);
    env::remove_var(ENV_CONFIG);

    assert!(config.unwrap().strict);
}

#[test]
#[serial]
fn test_env_beats_toml_value() {
    env::set_var(ENV_DATABASE, "/env/out.db");
    let resolved = resolve_path(None, ENV_DATABASE, Some(Path::new("/toml/out.db")), || {
        PathBuf::from("/fallback.db")
    });
    env::remove_var(ENV_DATABASE);

    assert_eq!(resolved, PathBuf::from("/env/out.db"));
}
