use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::partition::DEFAULT_PARTITIONS;

/// Store configuration. Every field has a default so a partial TOML file
/// (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Prefix of every partition root. The partition number is appended
    /// verbatim: `/mnt/drive` gives `/mnt/drive0`, `/mnt/drive1`, ...
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    /// Payload directory name under each partition root.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// Full-text index directory name under each partition root.
    #[serde(default = "default_index_dir")]
    pub index_dir: String,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Sizing of the fan-out worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Workers started eagerly and kept for the pool's lifetime.
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,
    /// Upper bound on workers, including overflow workers spawned when the
    /// queue is full.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Jobs that may wait for a worker. Past this (and `max_pool_size`)
    /// submissions are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
    /// Idle time after which an overflow worker exits.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
}

fn default_storage_root() -> String {
    "./data/partition".to_string()
}
fn default_storage_dir() -> String {
    "files".to_string()
}
fn default_index_dir() -> String {
    "index".to_string()
}
fn default_partitions() -> usize {
    DEFAULT_PARTITIONS
}
fn default_search_timeout_ms() -> u64 {
    60_000
}
fn default_core_pool_size() -> usize {
    4
}
fn default_max_pool_size() -> usize {
    16
}
fn default_queue_capacity() -> usize {
    64
}
fn default_thread_name_prefix() -> String {
    "fanout-".to_string()
}
fn default_keep_alive_ms() -> u64 {
    60_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            storage_dir: default_storage_dir(),
            index_dir: default_index_dir(),
            partitions: default_partitions(),
            search_timeout_ms: default_search_timeout_ms(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
            queue_capacity: default_queue_capacity(),
            thread_name_prefix: default_thread_name_prefix(),
            keep_alive_ms: default_keep_alive_ms(),
        }
    }
}

impl StoreConfig {
    /// Defaults rooted at `storage_root`; convenient for tests and embedding.
    pub fn with_root(storage_root: impl Into<String>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Load config from a TOML file, falling back to defaults.
    /// Env var overrides are applied afterwards:
    /// env var > TOML file > defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    StoreError::Config(format!("failed to read config file {}: {e}", p.display()))
                })?;
                toml::from_str(&content)
                    .map_err(|e| StoreError::Config(format!("failed to parse config: {e}")))?
            }
            None => StoreConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SHARDSTORE_STORAGE_ROOT") {
            self.storage_root = v;
        }
        if let Ok(v) = std::env::var("SHARDSTORE_STORAGE_DIR") {
            self.storage_dir = v;
        }
        if let Ok(v) = std::env::var("SHARDSTORE_INDEX_DIR") {
            self.index_dir = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_PARTITIONS") {
            self.partitions = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_SEARCH_TIMEOUT_MS") {
            self.search_timeout_ms = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_EXECUTOR_CORE_POOL_SIZE") {
            self.executor.core_pool_size = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_EXECUTOR_MAX_POOL_SIZE") {
            self.executor.max_pool_size = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_EXECUTOR_QUEUE_CAPACITY") {
            self.executor.queue_capacity = v;
        }
        if let Ok(v) = std::env::var("SHARDSTORE_EXECUTOR_THREAD_NAME_PREFIX") {
            self.executor.thread_name_prefix = v;
        }
        if let Some(v) = env_parse("SHARDSTORE_EXECUTOR_KEEP_ALIVE_MS") {
            self.executor.keep_alive_ms = v;
        }
    }

    /// Rejects configurations the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.partitions.is_power_of_two() {
            return Err(StoreError::Config(format!(
                "partitions must be a power of two, got {}",
                self.partitions
            )));
        }
        if self.storage_dir.is_empty() || self.index_dir.is_empty() {
            return Err(StoreError::Config(
                "storage_dir and index_dir must not be empty".to_string(),
            ));
        }
        if self.storage_dir == self.index_dir {
            return Err(StoreError::Config(format!(
                "storage_dir and index_dir must differ, both are {:?}",
                self.storage_dir
            )));
        }
        self.executor.validate()
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(StoreError::Config(
                "executor.max_pool_size must be at least 1".to_string(),
            ));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(StoreError::Config(format!(
                "executor.core_pool_size ({}) exceeds max_pool_size ({})",
                self.core_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StoreConfig::default();
        assert_eq!(config.partitions, 16);
        assert_eq!(config.search_timeout(), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: StoreConfig = toml::from_str(
            r#"
            storage_root = "/mnt/drive"

            [executor]
            core_pool_size = 2
            queue_capacity = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.storage_root, "/mnt/drive");
        assert_eq!(config.storage_dir, "files");
        assert_eq!(config.executor.core_pool_size, 2);
        assert_eq!(config.executor.max_pool_size, 16);
        assert_eq!(config.executor.queue_capacity, 8);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "index_dir = \"lucene\"\nsearch_timeout_ms = 1500\n").unwrap();
        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.index_dir, "lucene");
        assert_eq!(config.search_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = StoreConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = StoreConfig {
            partitions: 10,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());

        config.partitions = 16;
        config.index_dir = config.storage_dir.clone();
        assert!(config.validate().is_err());

        config.index_dir = "index".to_string();
        config.executor.core_pool_size = 32;
        assert!(config.validate().is_err());

        config.executor.core_pool_size = 0;
        config.executor.max_pool_size = 0;
        assert!(config.validate().is_err());
    }
}
