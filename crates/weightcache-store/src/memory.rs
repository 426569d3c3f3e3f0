//! In-memory store
//!
//! Keeps the three tables in process memory. Besides serving as a
//! non-persistent backend it lets tests inspect tables directly, inject
//! failures for individual keys and check that connections are released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use weightcache_core::{CacheError, CacheResult, Table};

use crate::traits::{Store, StoreConnection};

type TablesMap = HashMap<Table, HashMap<String, Vec<u8>>>;
type FaultSet = HashSet<(StoreOp, Table, String)>;

/// Store operation kind, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Delete,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreOp::Get => write!(f, "get"),
            StoreOp::Put => write!(f, "put"),
            StoreOp::Delete => write!(f, "delete"),
        }
    }
}

/// In-process store with the three cache tables
pub struct MemoryStore {
    tables: Arc<RwLock<TablesMap>>,
    faults: Arc<RwLock<FaultSet>>,
    open_connections: Arc<AtomicUsize>,
    fail_open: AtomicBool,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let tables: TablesMap = Table::ALL
            .iter()
            .map(|table| (*table, HashMap::new()))
            .collect();
        Self {
            tables: Arc::new(RwLock::new(tables)),
            faults: Arc::new(RwLock::new(HashSet::new())),
            open_connections: Arc::new(AtomicUsize::new(0)),
            fail_open: AtomicBool::new(false),
            available: AtomicBool::new(true),
        }
    }

    /// Make `op` on `table`/`key` fail until faults are cleared
    pub async fn fail_on(&self, op: StoreOp, table: Table, key: &str) {
        self.faults.write().await.insert((op, table, key.to_string()));
    }

    /// Remove all injected failures
    pub async fn clear_faults(&self) {
        self.faults.write().await.clear();
    }

    /// Make `open` fail
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Control the capability probe result
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Read a value directly, bypassing connections and faults
    pub async fn entry(&self, table: Table, key: &str) -> Option<Vec<u8>> {
        let tables = self.tables.read().await;
        tables.get(&table).and_then(|t| t.get(key)).cloned()
    }

    /// All keys of a table, sorted
    pub async fn keys(&self, table: Table) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut keys: Vec<String> = tables
            .get(&table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Remove a value directly, bypassing connections and faults
    pub async fn remove(&self, table: Table, key: &str) -> Option<Vec<u8>> {
        let mut tables = self.tables.write().await;
        tables.get_mut(&table).and_then(|t| t.remove(key))
    }

    /// Number of connections not yet closed or dropped
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn open(&self) -> CacheResult<Box<dyn StoreConnection>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CacheError::Storage(
                "injected open failure".to_string(),
            ));
        }
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        debug!(
            open = self.open_connections(),
            "Opened memory store connection"
        );
        Ok(Box::new(MemoryConnection {
            tables: Arc::clone(&self.tables),
            faults: Arc::clone(&self.faults),
            open_connections: Arc::clone(&self.open_connections),
            closed: AtomicBool::new(false),
        }))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    tables: Arc<RwLock<TablesMap>>,
    faults: Arc<RwLock<FaultSet>>,
    open_connections: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MemoryConnection {
    async fn check(&self, op: StoreOp, table: Table, key: &str) -> CacheResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("connection is closed".to_string()));
        }
        let faults = self.faults.read().await;
        if faults.contains(&(op, table, key.to_string())) {
            return Err(CacheError::Storage(format!(
                "injected {} failure on {}/{}",
                op, table, key
            )));
        }
        Ok(())
    }

    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&self, table: Table, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check(StoreOp::Get, table, key).await?;
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: Table, key: &str, value: &[u8]) -> CacheResult<()> {
        self.check(StoreOp::Put, table, key).await?;
        let mut tables = self.tables.write().await;
        tables
            .entry(table)
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> CacheResult<()> {
        self.check(StoreOp::Delete, table, key).await?;
        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get_mut(&table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}
