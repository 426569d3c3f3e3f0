//! Configuration types for weightcache

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CacheError, CacheResult};

/// Default maximum chunk size in bytes
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 500_000_000;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "WEIGHTCACHE";

/// Main cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> CacheResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CacheError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by
    /// `WEIGHTCACHE__SECTION__KEY` environment variables
    pub fn load(path: Option<&Path>) -> CacheResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache cannot operate with
    pub fn validate(&self) -> CacheResult<()> {
        if self.chunking.max_chunk_size == 0 {
            return Err(CacheError::Config(
                "chunking.max_chunk_size must be positive".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Redb
            && self.storage.database_path.as_os_str().is_empty()
        {
            return Err(CacheError::Config(
                "storage.database_path is required for the redb backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process tables, lost on exit
    Memory,
    /// Persistent redb database file
    Redb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type
    pub backend: StorageBackend,
    /// Path to the database file (redb backend)
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Redb,
            database_path: PathBuf::from("weightcache.redb"),
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Payloads larger than this are split into chunks of at most this size
    pub max_chunk_size: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.chunking.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(config.storage.backend, StorageBackend::Redb);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse_partial() {
        let toml_str = r#"
[storage]
backend = "memory"

[chunking]
max_chunk_size = 1024
"#;
        let config: CacheConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.chunking.max_chunk_size, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = CacheConfig::default();
        config.chunking.max_chunk_size = 0;
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\nbackend = \"redb\"\ndatabase_path = \"/tmp/wc.redb\"\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = CacheConfig::from_file(file.path()).unwrap();
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/wc.redb"));
        assert_eq!(config.logging.format, "json");

        let layered = CacheConfig::load(Some(file.path())).unwrap();
        assert_eq!(layered.storage.database_path, config.storage.database_path);
        assert_eq!(layered.chunking.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[chunking]\nmax_chunk_size = 0").unwrap();
        assert!(CacheConfig::from_file(file.path()).is_err());
    }
}
