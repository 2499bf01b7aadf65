//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "SMART_ROOT_FOLDER";

/// Engine tuning knobs
///
/// Every field has a default so a partial `[engine]` table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items per label used to derive a project's batch size
    pub items_per_label: u32,
    /// Redundant assignments per annotator slot; `None` means
    /// "every other annotator" (annotator_count - 1)
    pub redundancy_factor: Option<u32>,
    /// Queue ordering policy name ("random", "least_confident")
    pub ordering_policy: String,
    /// Data rows per vectorization task
    pub vectorize_partition_size: usize,
    /// Attempts allowed per pipeline task before it is marked failed
    pub task_retry_budget: u32,
    /// Initial backoff between task attempts (doubles per attempt)
    pub task_retry_backoff_ms: u64,
    /// Per-attempt timeout for a pipeline task
    pub task_timeout_ms: u64,
    /// Maximum pipeline tasks running at once
    pub worker_concurrency: usize,
    /// Largest accepted upload
    pub max_upload_bytes: u64,
    /// Skip rows whose text already exists in the project
    pub dedup_on_text: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            items_per_label: 10,
            redundancy_factor: None,
            ordering_policy: "random".to_string(),
            vectorize_partition_size: 500,
            task_retry_budget: 3,
            task_retry_backoff_ms: 100,
            task_timeout_ms: 300_000,
            worker_concurrency: 4,
            max_upload_bytes: 4 * 1000 * 1000 * 1000,
            dedup_on_text: true,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.vectorize_partition_size == 0 {
            return Err(Error::Config("vectorize_partition_size must be at least 1".to_string()));
        }
        if self.task_retry_budget == 0 {
            return Err(Error::Config("task_retry_budget must be at least 1".to_string()));
        }
        if self.worker_concurrency == 0 {
            return Err(Error::Config("worker_concurrency must be at least 1".to_string()));
        }
        if self.task_timeout_ms == 0 {
            return Err(Error::Config("task_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

impl TomlConfig {
    /// Log level to use when `RUST_LOG` is unset
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.engine.validate()?;
    Ok(config)
}

/// Load the first config file found, or defaults when there is none
///
/// A missing file is not an error; a malformed one is.
pub fn load_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit_path {
        return load_toml_config(path);
    }

    match find_config_file() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root_folder) = &toml_config.root_folder {
        return root_folder.clone();
    }

    default_root_folder()
}

/// SQLite database location under the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("smart.db")
}

/// Raw upload artifacts location under the root folder
pub fn data_files_dir(root_folder: &Path) -> PathBuf {
    root_folder.join("data_files")
}

fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("smart").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/smart/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("smart"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\smart"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("smart"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/smart"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("smart"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/smart"))
    }
}
