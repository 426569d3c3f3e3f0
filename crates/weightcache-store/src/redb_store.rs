//! redb-backed persistent store
//!
//! Each cache table maps to a redb table with `&str` keys and `&[u8]`
//! values. redb is synchronous, so every call runs on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, info};
use weightcache_core::{CacheError, CacheResult, Table};

use crate::traits::{Store, StoreConnection};

/// Current on-disk schema version
pub const SCHEMA_VERSION: u64 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

const INFO: TableDefinition<&str, &[u8]> = TableDefinition::new(Table::Info.name());
const ARTIFACTS: TableDefinition<&str, &[u8]> = TableDefinition::new(Table::Artifact.name());
const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new(Table::Chunk.name());
const META: TableDefinition<&str, u64> = TableDefinition::new("weightcache_meta");

/// Convert any `Display` error into a `CacheError::Storage` with context.
macro_rules! map_err {
    ($what:literal) => {
        |e| CacheError::Storage(format!(concat!($what, ": {}"), e))
    };
}

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        Table::Info => INFO,
        Table::Artifact => ARTIFACTS,
        Table::Chunk => CHUNKS,
    }
}

/// Persistent store backed by a single redb file
pub struct RedbStore {
    path: PathBuf,
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path` and ensure the schema exists
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(map_err!("open database"))?;
        ensure_schema(&db)?;
        info!(path = %path.display(), "Opened weight cache database");
        Ok(Self {
            path: path.to_path_buf(),
            db: Arc::new(db),
        })
    }

    /// Whether a database could be created at `path`
    pub fn probe(path: &Path) -> bool {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
        match std::fs::metadata(parent) {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    /// Delete the whole database file. No store may have it open.
    pub fn destroy(path: &Path) -> CacheResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "Deleted weight cache database");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create the tables and stamp the schema version. Idempotent.
fn ensure_schema(db: &Database) -> CacheResult<()> {
    let txn = db.begin_write().map_err(map_err!("begin write"))?;
    {
        for table in Table::ALL {
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(definition(table))
                .map_err(map_err!("open table"))?;
        }
        let mut meta = txn.open_table(META).map_err(map_err!("open table"))?;
        let existing = meta
            .get(SCHEMA_VERSION_KEY)
            .map_err(map_err!("read"))?
            .map(|guard| guard.value());
        match existing {
            None => {
                meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                    .map_err(map_err!("write"))?;
                debug!(version = SCHEMA_VERSION, "Created cache schema");
            }
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => {
                return Err(CacheError::Storage(format!(
                    "unsupported schema version {} (expected {})",
                    version, SCHEMA_VERSION
                )))
            }
        }
    }
    txn.commit().map_err(map_err!("commit"))?;
    Ok(())
}

#[async_trait]
impl Store for RedbStore {
    async fn open(&self) -> CacheResult<Box<dyn StoreConnection>> {
        Ok(Box::new(RedbConnection {
            db: Arc::clone(&self.db),
            closed: AtomicBool::new(false),
        }))
    }

    async fn is_available(&self) -> bool {
        Self::probe(&self.path)
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}

struct RedbConnection {
    db: Arc<Database>,
    closed: AtomicBool,
}

impl RedbConnection {
    async fn run<T, F>(&self, op: F) -> CacheResult<T>
    where
        F: FnOnce(&Database) -> CacheResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Storage("connection is closed".to_string()));
        }
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&*db))
            .await
            .map_err(map_err!("store task failed"))?
    }
}

#[async_trait]
impl StoreConnection for RedbConnection {
    async fn get(&self, table: Table, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |db| {
            let txn = db.begin_read().map_err(map_err!("begin read"))?;
            let t = txn
                .open_table(definition(table))
                .map_err(map_err!("open table"))?;
            let value = t
                .get(key.as_str())
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn put(&self, table: Table, key: &str, value: &[u8]) -> CacheResult<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run(move |db| {
            let txn = db.begin_write().map_err(map_err!("begin write"))?;
            {
                let mut t = txn
                    .open_table(definition(table))
                    .map_err(map_err!("open table"))?;
                t.insert(key.as_str(), value.as_slice())
                    .map_err(map_err!("write"))?;
            }
            txn.commit().map_err(map_err!("commit"))?;
            debug!(%table, %key, bytes = value.len(), "Stored record");
            Ok(())
        })
        .await
    }

    async fn delete(&self, table: Table, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.run(move |db| {
            let txn = db.begin_write().map_err(map_err!("begin write"))?;
            let existed;
            {
                let mut t = txn
                    .open_table(definition(table))
                    .map_err(map_err!("open table"))?;
                existed = t.remove(key.as_str()).map_err(map_err!("write"))?.is_some();
            }
            txn.commit().map_err(map_err!("commit"))?;
            debug!(%table, %key, existed, "Deleted record");
            Ok(())
        })
        .await
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&dir.path().join("cache.redb")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_dir, store) = temp_store();
        let conn = store.open().await.unwrap();

        conn.put(Table::Chunk, "m1_0", &[1, 2, 3]).await.unwrap();
        assert_eq!(
            conn.get(Table::Chunk, "m1_0").await.unwrap(),
            Some(vec![1, 2, 3])
        );

        conn.delete(Table::Chunk, "m1_0").await.unwrap();
        assert_eq!(conn.get(Table::Chunk, "m1_0").await.unwrap(), None);

        // deleting again is fine
        conn.delete(Table::Chunk, "m1_0").await.unwrap();
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let (_dir, store) = temp_store();
        let conn = store.open().await.unwrap();

        conn.put(Table::Info, "m1", b"info").await.unwrap();
        conn.put(Table::Artifact, "m1", b"artifact").await.unwrap();

        assert_eq!(conn.get(Table::Info, "m1").await.unwrap(), Some(b"info".to_vec()));
        assert_eq!(
            conn.get(Table::Artifact, "m1").await.unwrap(),
            Some(b"artifact".to_vec())
        );
        assert_eq!(conn.get(Table::Chunk, "m1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let (_dir, store) = temp_store();
        let conn = store.open().await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();

        let err = conn.get(Table::Info, "m1").await.unwrap_err();
        assert!(matches!(err, CacheError::Storage(_)));
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            let conn = store.open().await.unwrap();
            conn.put(Table::Info, "m1", b"x").await.unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        let conn = store.open().await.unwrap();
        assert_eq!(conn.get(Table::Info, "m1").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        drop(RedbStore::open(&path).unwrap());
        assert!(path.exists());

        RedbStore::destroy(&path).unwrap();
        assert!(!path.exists());
        RedbStore::destroy(&path).unwrap();
    }

    #[tokio::test]
    async fn test_probe() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RedbStore::probe(&dir.path().join("a").join("cache.redb")));

        let (_dir, store) = temp_store();
        assert!(store.is_available().await);
    }
}
