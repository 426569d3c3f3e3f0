//! Store trait definitions

use async_trait::async_trait;
use weightcache_core::{CacheResult, Table};

/// A persistent key/value substrate with the three cache tables
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a scoped connection. Tables are created on first open.
    async fn open(&self) -> CacheResult<Box<dyn StoreConnection>>;

    /// Capability probe: whether this store can currently persist anything
    async fn is_available(&self) -> bool;

    /// Get the store name
    fn name(&self) -> &'static str;
}

/// A connection scoped to a single cache operation.
///
/// Each call runs in its own transaction. Dropping the connection releases
/// it; `close` does the same explicitly and may be called more than once.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Read a value
    async fn get(&self, table: Table, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Insert or overwrite a value
    async fn put(&self, table: Table, key: &str, value: &[u8]) -> CacheResult<()>;

    /// Delete a value. Deleting an absent key succeeds.
    async fn delete(&self, table: Table, key: &str) -> CacheResult<()>;

    /// Release the connection
    async fn close(&self) -> CacheResult<()>;
}
