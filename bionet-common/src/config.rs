//! Configuration loading and root folder resolution
//!
//! Configuration never prevents startup: a missing or unreadable TOML file
//! logs a warning and every field falls back to its compiled default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "BIONET_ROOT_FOLDER";

/// Environment variable naming the TOML config file
pub const CONFIG_FILE_ENV: &str = "BIONET_CONFIG";

/// Database file inside the root folder
pub const DATABASE_FILE_NAME: &str = "bionet.db";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` still wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Ingestion service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub bind_address: String,
    pub port: u16,
    /// Offset of the clock sensors report `date`/`time` in, minutes east of UTC
    pub reported_utc_offset_minutes: i32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5730,
            reported_utc_offset_minutes: 0,
        }
    }
}

/// Rollup scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollupConfig {
    /// Wait after a bucket boundary before rolling it up, for late messages
    pub grace_delay_secs: u64,
    /// Detections older than this (by receipt) are swept
    pub retention_days: u32,
    /// Maximum detections deleted per sweep
    pub retention_batch_limit: u32,
    /// All-time accumulator conflict retries
    pub accumulator_max_attempts: u32,
    pub accumulator_max_wait_ms: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            grace_delay_secs: 60,
            retention_days: 7,
            retention_batch_limit: 2000,
            accumulator_max_attempts: 8,
            accumulator_max_wait_ms: 5000,
        }
    }
}

impl TomlConfig {
    /// Parse a config file, failing on unreadable or malformed content
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }

    /// Load configuration with graceful degradation.
    ///
    /// Lookup order: `explicit` path, `BIONET_CONFIG`, user config dir,
    /// `/etc/bionet/config.toml`. Any failure yields defaults.
    pub fn load(explicit: Option<&Path>) -> Self {
        let Some(path) = locate_config_file(explicit) else {
            info!("No config file found, using compiled defaults");
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("bionet").join("config.toml"));
    let system_config = PathBuf::from("/etc/bionet/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}

/// OS-dependent fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join("bionet"))
            .unwrap_or_else(|| PathBuf::from("./bionet_data"));

        Self {
            root_folder,
            log_level: "info".to_string(),
        }
    }
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `BIONET_ROOT_FOLDER`
/// 3. `root_folder` in the TOML config
/// 4. OS-dependent compiled default
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
        }
    }

    pub fn resolve(&self, cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &config.root_folder {
            return path.clone();
        }

        let defaults = CompiledDefaults::for_current_platform();
        info!(
            module = %self.module_name,
            "Using default root folder {}",
            defaults.root_folder.display()
        );
        defaults.root_folder
    }
}

/// Creates the root folder and locates the database inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root folder (and parents) if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
