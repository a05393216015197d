//! Configuration loading for docstore.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/docstore/config.toml.
//!
//! Settings are only read by the binary. Every component receives its own
//! section converted into an explicit config struct at construction.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::DocstoreError;

/// Storage location and embedding width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory of the embedded engine
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Width of chunk and code-block embeddings
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "docstore")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

/// Connection pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Idle handles older than this are closed on release
    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How long `acquire` may wait for a free handle
    #[serde(default = "default_pool_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

fn default_pool_max_size() -> usize {
    8
}

fn default_pool_idle_timeout() -> u64 {
    300
}

fn default_pool_acquire_timeout() -> u64 {
    5_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            idle_timeout_secs: default_pool_idle_timeout(),
            acquire_timeout_ms: default_pool_acquire_timeout(),
        }
    }
}

/// Query cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,

    #[serde(default = "default_l1_ttl")]
    pub l1_ttl_secs: u64,

    /// L2 is opt-in; single-process deployments do not need it
    #[serde(default)]
    pub l2_enabled: bool,

    #[serde(default)]
    pub l2_endpoint: Option<String>,

    #[serde(default = "default_l2_ttl")]
    pub l2_ttl_secs: u64,

    #[serde(default = "default_l2_timeout")]
    pub l2_timeout_ms: u64,
}

fn default_l1_max_entries() -> usize {
    1_000
}

fn default_l1_ttl() -> u64 {
    300
}

fn default_l2_ttl() -> u64 {
    3_600
}

fn default_l2_timeout() -> u64 {
    250
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            l1_max_entries: default_l1_max_entries(),
            l1_ttl_secs: default_l1_ttl(),
            l2_enabled: false,
            l2_endpoint: None,
            l2_ttl_secs: default_l2_ttl(),
            l2_timeout_ms: default_l2_timeout(),
        }
    }
}

/// Vector index tuning bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Below this many vectors no approximate index is trained
    #[serde(default = "default_min_trainable_rows")]
    pub min_trainable_rows: usize,

    #[serde(default = "default_min_partitions")]
    pub min_partitions: usize,

    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Dimensions folded into one product-quantization sub-vector
    #[serde(default = "default_sub_vector_granularity")]
    pub sub_vector_granularity: usize,

    #[serde(default = "default_min_sub_vectors")]
    pub min_sub_vectors: usize,

    #[serde(default = "default_max_sub_vectors")]
    pub max_sub_vectors: usize,

    /// Deadline for a single index build
    #[serde(default = "default_index_build_timeout")]
    pub build_timeout_ms: u64,
}

fn default_min_trainable_rows() -> usize {
    256
}

fn default_min_partitions() -> usize {
    2
}

fn default_max_partitions() -> usize {
    256
}

fn default_sub_vector_granularity() -> usize {
    16
}

fn default_min_sub_vectors() -> usize {
    1
}

fn default_max_sub_vectors() -> usize {
    96
}

fn default_index_build_timeout() -> u64 {
    60_000
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            min_trainable_rows: default_min_trainable_rows(),
            min_partitions: default_min_partitions(),
            max_partitions: default_max_partitions(),
            sub_vector_granularity: default_sub_vector_granularity(),
            min_sub_vectors: default_min_sub_vectors(),
            max_sub_vectors: default_max_sub_vectors(),
            build_timeout_ms: default_index_build_timeout(),
        }
    }
}

/// Migration batching and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_migration_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Deadline for each migration batch write and index build
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_ms: u64,
}

fn default_migration_batch_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    100
}

fn default_retry_max_delay() -> u64 {
    5_000
}

fn default_phase_timeout() -> u64 {
    120_000
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_migration_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            phase_timeout_ms: default_phase_timeout(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub migration: MigrationSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings::default(),
            pool: PoolSettings::default(),
            cache: CacheSettings::default(),
            index: IndexSettings::default(),
            migration: MigrationSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/docstore/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (DOCSTORE_*, `__` between section and key)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, DocstoreError> {
        let config_dir = ProjectDirs::from("", "", "docstore")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("storage.db_path", default_db_path())
            .map_err(|e| DocstoreError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| DocstoreError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: DOCSTORE_POOL__MAX_SIZE, DOCSTORE_CACHE__L2_ENABLED, DOCSTORE_LOG_LEVEL
        builder = builder.add_source(
            Environment::with_prefix("DOCSTORE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| DocstoreError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| DocstoreError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), DocstoreError> {
        if self.storage.embedding_dimension == 0 {
            return Err(DocstoreError::Config(
                "storage.embedding_dimension must be > 0".to_string(),
            ));
        }
        if self.pool.max_size == 0 {
            return Err(DocstoreError::Config("pool.max_size must be > 0".to_string()));
        }
        if self.cache.l2_enabled && self.cache.l2_endpoint.is_none() {
            return Err(DocstoreError::Config(
                "cache.l2_endpoint is required when cache.l2_enabled is set".to_string(),
            ));
        }
        if self.index.min_partitions > self.index.max_partitions {
            return Err(DocstoreError::Config(format!(
                "index.min_partitions ({}) exceeds index.max_partitions ({})",
                self.index.min_partitions, self.index.max_partitions
            )));
        }
        if self.index.min_sub_vectors > self.index.max_sub_vectors
            || self.index.sub_vector_granularity == 0
        {
            return Err(DocstoreError::Config(
                "index sub-vector bounds are inconsistent".to_string(),
            ));
        }
        if self.migration.batch_size == 0 {
            return Err(DocstoreError::Config(
                "migration.batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.storage.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.storage.db_path)
    }
}
