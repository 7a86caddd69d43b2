//! Configuration for elohim-chunkstore

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chunk size (1KB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default number of assembled objects held in the read cache
pub const DEFAULT_CACHE_CAPACITY: usize = 5;

/// Default interval between full cache sweeps (10 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elohim-chunkstore")
}

/// Which medium chunks are persisted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One file per chunk under `chunks/`
    #[default]
    Fs,
    /// Embedded sled tree at `chunks.sled`
    Sled,
    /// Process memory, lost on exit
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fs" => Ok(Self::Fs),
            "sled" => Ok(Self::Sled),
            "memory" => Ok(Self::Memory),
            other => Err(StorageError::Config(format!("Unknown backend: {}", other))),
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for chunks, metadata and config
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Chunk backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Maximum chunk payload in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of objects kept in the LRU read cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Seconds between full cache sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Track object metadata in `metadata.sled`
    #[serde(default = "default_true")]
    pub enable_metadata: bool,

    /// Peers every successful write is fanned out to
    #[serde(default)]
    pub replica_peers: Vec<String>,

    /// Fan out to `replica_peers` after each successful write
    #[serde(default)]
    pub replicate_on_write: bool,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: BackendKind::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            enable_metadata: true,
            replica_peers: Vec::new(),
            replicate_on_write: false,
        }
    }
}

impl Config {
    /// Config rooted at `storage_dir` with every other field defaulted
    pub fn with_storage_dir<P: AsRef<Path>>(storage_dir: P) -> Self {
        Self {
            storage_dir: storage_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.chunk_size == 0 {
            return Err(StorageError::Config("chunk_size must be at least 1".into()));
        }
        if self.cache_capacity == 0 {
            return Err(StorageError::Config("cache_capacity must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(StorageError::Config(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get chunk directory (fs backend)
    pub fn chunks_dir(&self) -> PathBuf {
        self.storage_dir.join("chunks")
    }

    /// Get chunk database path (sled backend)
    pub fn chunks_db_path(&self) -> PathBuf {
        self.storage_dir.join("chunks.sled")
    }

    /// Get metadata database path
    pub fn metadata_db_path(&self) -> PathBuf {
        self.storage_dir.join("metadata.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
