//! Configuration loading and root folder resolution tests
//!
//! Tests that touch SMART_ROOT_FOLDER are #[serial] so they never race on the
//! process environment.

use serial_test::serial;
use smart_common::config::{
    data_files_dir, database_path, load_config, load_toml_config, resolve_root_folder,
    EngineConfig, TomlConfig, ROOT_FOLDER_ENV,
};
use smart_common::Error;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/smart-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/smart-from-toml")),
        ..TomlConfig::default()
    };

    let root = resolve_root_folder(Some("/tmp/smart-from-cli"), &toml);
    assert_eq!(root, PathBuf::from("/tmp/smart-from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/smart-from-env");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/smart-from-toml")),
        ..TomlConfig::default()
    };

    assert_eq!(
        resolve_root_folder(None, &toml),
        PathBuf::from("/tmp/smart-from-env")
    );

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    env::set_var(ROOT_FOLDER_ENV, "   ");
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/smart-from-toml")),
        ..TomlConfig::default()
    };

    assert_eq!(
        resolve_root_folder(None, &toml),
        PathBuf::from("/tmp/smart-from-toml")
    );

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_compiled_default_is_used_last() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root = resolve_root_folder(None, &TomlConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("smart"));
}

#[test]
fn test_paths_under_root_folder() {
    let root = PathBuf::from("/srv/smart");
    assert_eq!(database_path(&root), root.join("smart.db"));
    assert_eq!(data_files_dir(&root), root.join("data_files"));
}

#[test]
fn test_partial_engine_table_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
log_level = "debug"

[engine]
items_per_label = 5
redundancy_factor = 2
ordering_policy = "least_confident"
"#,
    );

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.log_level(), "debug");
    assert!(config.root_folder.is_none());
    assert_eq!(config.engine.items_per_label, 5);
    assert_eq!(config.engine.redundancy_factor, Some(2));
    assert_eq!(config.engine.ordering_policy, "least_confident");

    let defaults = EngineConfig::default();
    assert_eq!(config.engine.vectorize_partition_size, defaults.vectorize_partition_size);
    assert_eq!(config.engine.task_retry_budget, defaults.task_retry_budget);
    assert_eq!(config.engine.dedup_on_text, defaults.dedup_on_text);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.log_level(), "info");
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[engine\nitems_per_label = ");

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[engine]\nvectorize_partition_size = 0\n");

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("vectorize_partition_size")));
}

#[test]
fn test_validate_each_knob() {
    let cases = [
        EngineConfig {
            task_retry_budget: 0,
            ..EngineConfig::default()
        },
        EngineConfig {
            worker_concurrency: 0,
            ..EngineConfig::default()
        },
        EngineConfig {
            task_timeout_ms: 0,
            ..EngineConfig::default()
        },
    ];
    for config in cases {
        assert!(config.validate().is_err(), "{:?} accepted", config);
    }
    assert!(EngineConfig::default().validate().is_ok());
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(matches!(load_config(Some(&missing)), Err(Error::Config(_))));
}
