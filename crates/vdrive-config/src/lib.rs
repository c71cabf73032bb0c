//! # vdrive-config
//!
//! Configuration management for vdrive.
//!
//! Loads configuration from:
//! 1. `~/.vdrive/config.toml` (global)
//! 2. `.vdrive/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub drive: DriveConfig,
    pub mount: MountConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.vdrive/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Load project config (.vdrive/config.toml) - overrides global
        let project_path = Path::new(".vdrive/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::from_file(project_path)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.vdrive/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vdrive/config.toml"))
    }

    /// Merge another config. Values that differ from the defaults win.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.storage.content_root != defaults.storage.content_root {
            self.storage.content_root = other.storage.content_root;
        }
        if other.storage.index_dir != defaults.storage.index_dir {
            self.storage.index_dir = other.storage.index_dir;
        }
        if other.drive.name != defaults.drive.name {
            self.drive.name = other.drive.name;
        }
        if other.drive.create != defaults.drive.create {
            self.drive.create = other.drive.create;
        }
        if other.drive.replay_limit.is_some() {
            self.drive.replay_limit = other.drive.replay_limit;
        }
        if other.mount.fs_name != defaults.mount.fs_name {
            self.mount.fs_name = other.mount.fs_name;
        }
        if other.mount.subtype != defaults.mount.subtype {
            self.mount.subtype = other.mount.subtype;
        }
        if other.mount.allow_other != defaults.mount.allow_other {
            self.mount.allow_other = other.mount.allow_other;
        }
        if other.mount.max_file_size != defaults.mount.max_file_size {
            self.mount.max_file_size = other.mount.max_file_size;
        }
        if other.mount.workers != defaults.mount.workers {
            self.mount.workers = other.mount.workers;
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VDRIVE_CONTENT_ROOT") {
            self.storage.content_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VDRIVE_INDEX_DIR") {
            self.storage.index_dir = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("VDRIVE_NAME") {
            if !name.is_empty() {
                self.drive.name = name;
            }
        }
    }

    /// Content store root with `~` expanded.
    pub fn content_root(&self) -> PathBuf {
        path::expand_tilde(&self.storage.content_root)
    }

    /// Index directory with `~` expanded.
    pub fn index_dir(&self) -> PathBuf {
        path::expand_tilde(&self.storage.index_dir)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Content store root directory
    pub content_root: PathBuf,
    /// Directory holding drive indexes
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("~/.vdrive/content"),
            index_dir: PathBuf::from("~/.vdrive/index"),
        }
    }
}

/// Drive selection and recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Drive name or fully qualified address
    pub name: String,
    /// Create the drive when it does not exist
    pub create: bool,
    /// Max op-log entries replayed after the snapshot (None = all)
    pub replay_limit: Option<usize>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            create: true,
            replay_limit: None,
        }
    }
}

/// Filesystem mount options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fs_name: String,
    pub subtype: String,
    /// Let other users access the mount (needs `user_allow_other`)
    pub allow_other: bool,
    /// Largest file a single write session may buffer, in bytes
    pub max_file_size: u64,
    /// Threads serving reads, writes and commits off the session thread
    pub workers: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "vdrive".to_string(),
            subtype: "vdrive".to_string(),
            allow_other: false,
            max_file_size: 1 << 30,
            workers: 4,
        }
    }
}
