//! weightcache-store: Persistence primitives
//!
//! This crate provides the store contract the cache engine writes through:
//! - `Store` / `StoreConnection` traits over the three tables
//! - redb-backed persistent store
//! - In-memory store with fault injection

pub mod memory;
pub mod redb_store;
pub mod traits;

pub use memory::{MemoryStore, StoreOp};
pub use redb_store::RedbStore;
pub use traits::{Store, StoreConnection};

use std::sync::Arc;
use weightcache_core::{CacheError, CacheResult, StorageBackend, StorageConfig};

/// Build the store selected by `config`.
///
/// Fails with `UnsupportedPlatform` when the redb location is unusable.
pub fn open_store(config: &StorageConfig) -> CacheResult<Arc<dyn Store>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Redb => {
            if !RedbStore::probe(&config.database_path) {
                return Err(CacheError::UnsupportedPlatform(format!(
                    "no writable location for {}",
                    config.database_path.display()
                )));
            }
            Ok(Arc::new(RedbStore::open(&config.database_path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_open_memory_store() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            database_path: PathBuf::new(),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_open_redb_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Redb,
            database_path: dir.path().join("nested").join("cache.redb"),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "redb");
        assert!(config.database_path.exists());
    }
}
