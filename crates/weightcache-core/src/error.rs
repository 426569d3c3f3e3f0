//! Error types for weightcache

use thiserror::Error;

/// Main error type for weightcache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying store operation failed (transaction, get, put or delete)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Artifact not present in the cache
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Artifact record references chunks that cannot all be fetched
    #[error("Corrupt cache entry '{path}': missing chunk '{chunk_key}'")]
    CorruptEntry {
        /// Artifact path of the broken entry
        path: String,
        /// First chunk key found missing
        chunk_key: String,
    },

    /// No persistent store is usable on this platform
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// Artifact still absent after a fetch-and-save attempt
    #[error("Artifact unavailable: {0}")]
    Unavailable(String),

    /// Artifact source failed
    #[error("Artifact source error: {0}")]
    Source(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for weightcache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// Whether this error means the entry exists but cannot be reassembled
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::CorruptEntry { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        CacheError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(err: config::ConfigError) -> Self {
        CacheError::Config(err.to_string())
    }
}
