//! Configuration management for the schema registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schemas.toml)
//! - Environment variables (SCHEMAS__*)
//!
//! ## Example config file (schemas.toml):
//! ```toml
//! [snapshot]
//! path = "./state/schemas.json"
//! pretty = false
//!
//! [accounting]
//! base_bytes = 128
//! per_column_bytes = 64
//!
//! [automaton]
//! queue_capacity = 1024
//! thread_name = "schema-automaton"
//!
//! [logging]
//! filter = "master_schemas=info"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::accounting::StructuralCostModel;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Snapshot settings
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Memory accounting settings
    #[serde(default)]
    pub accounting: AccountingConfig,

    /// Mutation automaton settings
    #[serde(default)]
    pub automaton: AutomatonConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Path of the snapshot file
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,

    /// Write indented JSON
    #[serde(default)]
    pub pretty: bool,
}

/// Cost model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    #[serde(default = "default_base_bytes")]
    pub base_bytes: i64,

    #[serde(default = "default_per_column_bytes")]
    pub per_column_bytes: i64,
}

/// Automaton configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomatonConfig {
    /// Bound of the mutation queue; 0 means unbounded
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Name of the writer thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("schemas.snapshot.json")
}

fn default_base_bytes() -> i64 {
    StructuralCostModel::default().base_bytes
}

fn default_per_column_bytes() -> i64 {
    StructuralCostModel::default().per_column_bytes
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_thread_name() -> String {
    "schema-automaton".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            pretty: false,
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            base_bytes: default_base_bytes(),
            per_column_bytes: default_per_column_bytes(),
        }
    }
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            thread_name: default_thread_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl AccountingConfig {
    /// Build the cost model these parameters describe
    pub fn cost_model(&self) -> StructuralCostModel {
        StructuralCostModel {
            base_bytes: self.base_bytes,
            per_column_bytes: self.per_column_bytes,
        }
    }
}

impl SchemasConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["schemas.toml", ".schemas.toml", "config/schemas.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "master", "schemas") {
            let xdg_config = config_dir.config_dir().join("schemas.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMAS__*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMAS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the snapshot path (resolves relative paths)
    pub fn snapshot_path(&self) -> PathBuf {
        if self.snapshot.path.is_absolute() {
            self.snapshot.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.snapshot.path)
        }
    }
}
