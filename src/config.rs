//! Configuration for Elevator
//!
//! Centralized configuration with sensible defaults. The on-disk form is a
//! TOML file with a `[core]` and a `[storage_engine]` section; every field is
//! optional and falls back to its default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::database::validate_name;
use crate::error::{ElevatorError, Result};

/// Log levels accepted by `core.log_level` (case-insensitive)
const LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Main configuration for an Elevator instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server process settings
    pub core: CoreConfig,

    /// Settings handed to every storage engine instance on mount
    pub storage_engine: StorageEngineConfig,
}

/// Process-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Accepted for compatibility; detaching is left to the supervisor
    pub daemonize: bool,

    /// Listen endpoint, `tcp://host:port` or plain `host:port`
    pub endpoint: String,

    /// Pid file written at startup and removed at shutdown
    pub pidfile: Option<PathBuf>,

    /// Path of the persisted database catalogue
    #[serde(rename = "database_store")]
    pub store_path: PathBuf,

    /// Root directory under which every database gets `{root}/{name}`
    #[serde(rename = "databases_storage_path")]
    pub data_root: PathBuf,

    /// Name of the database created at startup when missing
    pub default_db: String,

    /// Whether `default_db` is created at startup when missing
    pub auto_create_default_db: bool,

    /// Log destination; stderr when unset
    pub log_file: Option<PathBuf>,

    /// One of TRACE, DEBUG, INFO, WARN, ERROR
    pub log_level: String,
}

/// Storage engine tunables
///
/// Maps one-to-one onto RocksDB options when a database is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageEngineConfig {
    /// Snappy block compression
    pub compression: bool,

    /// Data block size in bytes
    pub block_size: usize,

    /// LRU block cache capacity in bytes (per database)
    pub cache_size: usize,

    /// Bloom filter bits per key
    pub bloom_filter_bits: u32,

    /// Max file descriptors the engine keeps open
    pub max_open_files: i32,

    /// Paranoid checks on open and checksum verification on reads
    pub verify_checksums: bool,

    /// Memtable size in bytes before it is flushed
    pub write_buffer_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            daemonize: false,
            endpoint: "tcp://127.0.0.1:4141".to_string(),
            pidfile: None,
            store_path: PathBuf::from("/var/lib/elevator/store"),
            data_root: PathBuf::from("/var/lib/elevator"),
            default_db: "default".to_string(),
            auto_create_default_db: true,
            log_file: None,
            log_level: "INFO".to_string(),
        }
    }
}

impl Default for StorageEngineConfig {
    fn default() -> Self {
        Self {
            compression: true,
            block_size: 4096,
            cache_size: 512 * 1024 * 1024, // 512 MB
            bloom_filter_bits: 100,
            max_open_files: 150,
            verify_checksums: false,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl CoreConfig {
    /// Listen address with any `tcp://` scheme stripped
    pub fn listen_addr(&self) -> &str {
        self.endpoint
            .strip_prefix("tcp://")
            .unwrap_or(&self.endpoint)
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a config from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ElevatorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ElevatorError::Config(e.to_string()))
    }

    /// Render the config as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ElevatorError::Config(e.to_string()))
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        let core = &self.core;
        let engine = &self.storage_engine;

        if core.listen_addr().is_empty() {
            return Err(ElevatorError::Config("endpoint must not be empty".to_string()));
        }
        if !LOG_LEVELS.contains(&core.log_level.to_ascii_uppercase().as_str()) {
            return Err(ElevatorError::Config(format!(
                "unknown log level '{}'",
                core.log_level
            )));
        }
        validate_name(&core.default_db)
            .map_err(|e| ElevatorError::Config(format!("default_db: {}", e)))?;

        if engine.block_size == 0 {
            return Err(ElevatorError::Config("block_size must be positive".to_string()));
        }
        if engine.write_buffer_size == 0 {
            return Err(ElevatorError::Config(
                "write_buffer_size must be positive".to_string(),
            ));
        }
        if engine.bloom_filter_bits == 0 {
            return Err(ElevatorError::Config(
                "bloom_filter_bits must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the listen endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.core.endpoint = endpoint.into();
        self
    }

    /// Set the catalogue path
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.core.store_path = path.into();
        self
    }

    /// Set the data root (parent of every database directory)
    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.core.data_root = path.into();
        self
    }

    /// Set the default database name
    pub fn default_db(mut self, name: impl Into<String>) -> Self {
        self.config.core.default_db = name.into();
        self
    }

    /// Toggle default database creation at startup
    pub fn auto_create_default_db(mut self, enabled: bool) -> Self {
        self.config.core.auto_create_default_db = enabled;
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.core.log_level = level.into();
        self
    }

    /// Replace the storage engine settings
    pub fn storage_engine(mut self, engine: StorageEngineConfig) -> Self {
        self.config.storage_engine = engine;
        self
    }

    /// Set the block cache size (in bytes)
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.config.storage_engine.cache_size = bytes;
        self
    }

    /// Set the write buffer size (in bytes)
    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.config.storage_engine.write_buffer_size = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
