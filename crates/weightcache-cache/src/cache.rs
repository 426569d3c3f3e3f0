//! Artifact cache: multi-table save and load
//!
//! An artifact occupies up to three tables: its info record, its artifact
//! record and, for payloads larger than the chunk size, one chunk record per
//! slice. Save writes them in the order info, chunks, artifact record, each
//! in its own transaction, so an artifact record is never visible before the
//! chunks it references. A failed step rolls back what the save wrote
//! before it and surfaces the original error.
//!
//! Re-saving a path with fewer chunks leaves the excess old chunk records
//! in place, and chunks written before a failed artifact-record write are
//! kept. Concurrent saves/loads of the same path are not coordinated.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};
use weightcache_core::{
    Artifact, ArtifactInfo, ArtifactRecord, CacheConfig, CacheError, CacheResult, Table,
};
use weightcache_store::{open_store, Store, StoreConnection};

use crate::chunk::{concatenate, ChunkPlanner};
use crate::rollback;

/// Chunked artifact cache over a [`Store`]
pub struct ArtifactCache {
    store: Arc<dyn Store>,
    planner: ChunkPlanner,
}

impl ArtifactCache {
    /// Create a new artifact cache
    pub fn new(store: Arc<dyn Store>, max_chunk_size: usize) -> CacheResult<Self> {
        Ok(Self {
            store,
            planner: ChunkPlanner::new(max_chunk_size)?,
        })
    }

    /// Create a cache with the store and chunk size described by `config`
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let max_chunk_size = usize::try_from(config.chunking.max_chunk_size).map_err(|_| {
            CacheError::Config(format!(
                "max_chunk_size {} does not fit this platform",
                config.chunking.max_chunk_size
            ))
        })?;
        let store = open_store(&config.storage)?;
        info!(
            store = store.name(),
            max_chunk_size = max_chunk_size,
            "Artifact cache initialized"
        );
        Self::new(store, max_chunk_size)
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Maximum chunk size in bytes
    pub fn max_chunk_size(&self) -> usize {
        self.planner.max_chunk_size()
    }

    /// Capability probe of the underlying store
    pub async fn is_store_available(&self) -> bool {
        self.store.is_available().await
    }

    /// Save `artifact` under `path`, returning the info measured before writing
    pub async fn save(&self, path: &str, artifact: Artifact) -> CacheResult<ArtifactInfo> {
        let conn = self.store.open().await?;
        let result = self.save_with(conn.as_ref(), path, artifact).await;
        release(conn.as_ref(), path).await;
        result
    }

    async fn save_with(
        &self,
        conn: &dyn StoreConnection,
        path: &str,
        artifact: Artifact,
    ) -> CacheResult<ArtifactInfo> {
        let info = ArtifactInfo::measure(&artifact)?;
        conn.put(Table::Info, path, &info.encode()?).await?;
        debug!(path = path, payload_bytes = info.payload_byte_size, "Wrote info record");

        let record = self.write_payload(conn, path, artifact).await?;

        let written = match record.encode() {
            Ok(bytes) => conn.put(Table::Artifact, path, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = path, error = %e, "Artifact record write failed, rolling back info");
            rollback::delete_one(conn, Table::Info, path).await;
            return Err(e);
        }

        info!(
            path = path,
            payload_bytes = info.payload_byte_size,
            chunks = record.chunk_keys.as_ref().map_or(0, Vec::len),
            "Saved artifact"
        );
        Ok(info)
    }

    /// Persist the payload as chunks when it exceeds the chunk size and
    /// build the artifact record. Rolls back chunks and info on failure.
    async fn write_payload(
        &self,
        conn: &dyn StoreConnection,
        path: &str,
        artifact: Artifact,
    ) -> CacheResult<ArtifactRecord> {
        let Some(payload) = artifact.payload.as_deref() else {
            return Ok(ArtifactRecord::inline(artifact));
        };
        if !self.planner.needs_chunking(payload.len()) {
            return Ok(ArtifactRecord::inline(artifact));
        }

        let spans = self.planner.plan(payload.len(), path);
        let results = futures::future::join_all(
            spans
                .iter()
                .map(|span| conn.put(Table::Chunk, &span.key, span.slice(payload))),
        )
        .await;

        let keys: Vec<String> = spans.into_iter().map(|span| span.key).collect();
        if let Some(e) = results.into_iter().find_map(Result::err) {
            warn!(
                path = path,
                chunks = keys.len(),
                error = %e,
                "Chunk write failed, rolling back"
            );
            let mut report = rollback::delete_all(conn, Table::Chunk, &keys).await;
            report.merge(rollback::delete_one(conn, Table::Info, path).await);
            if !report.is_clean() {
                warn!(
                    path = path,
                    failed = report.failed.len(),
                    "Rollback left records behind"
                );
            }
            return Err(e);
        }

        debug!(path = path, chunks = keys.len(), "Wrote chunk records");
        Ok(ArtifactRecord::chunked(artifact, keys))
    }

    /// Load the artifact saved under `path`.
    ///
    /// Returns `Ok(None)` when nothing was cached under `path`, and
    /// `CorruptEntry` when the record references a chunk that is missing.
    pub async fn load(&self, path: &str) -> CacheResult<Option<Artifact>> {
        let conn = self.store.open().await?;
        let result = self.load_with(conn.as_ref(), path).await;
        release(conn.as_ref(), path).await;
        result
    }

    async fn load_with(
        &self,
        conn: &dyn StoreConnection,
        path: &str,
    ) -> CacheResult<Option<Artifact>> {
        let Some(bytes) = conn.get(Table::Artifact, path).await? else {
            debug!(path = path, "Artifact not cached");
            return Ok(None);
        };

        let mut record = ArtifactRecord::decode(&bytes)?;
        if let Some(keys) = record.chunk_keys.take() {
            record.payload = Some(fetch_chunks(conn, path, &keys).await?);
        }

        let artifact = record.into_artifact();
        info!(
            path = path,
            payload_bytes = artifact.payload_len(),
            "Loaded artifact"
        );
        Ok(Some(artifact))
    }

    /// Load the artifact saved under `path`, failing with `NotFound` if absent
    pub async fn get(&self, path: &str) -> CacheResult<Artifact> {
        self.load(path)
            .await?
            .ok_or_else(|| CacheError::NotFound(path.to_string()))
    }

    /// Read the info record saved under `path`
    pub async fn info(&self, path: &str) -> CacheResult<Option<ArtifactInfo>> {
        let conn = self.store.open().await?;
        let result = conn.get(Table::Info, path).await;
        release(conn.as_ref(), path).await;
        result?.map(|bytes| ArtifactInfo::decode(&bytes)).transpose()
    }
}

/// Fetch all chunks concurrently and join them in `keys` order, whatever
/// order the fetches complete in
async fn fetch_chunks(
    conn: &dyn StoreConnection,
    path: &str,
    keys: &[String],
) -> CacheResult<Vec<u8>> {
    let mut pending: FuturesUnordered<_> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| async move { (index, conn.get(Table::Chunk, key).await) })
        .collect();

    let mut slots: Vec<Option<Vec<u8>>> = vec![None; keys.len()];
    while let Some((index, result)) = pending.next().await {
        match result? {
            Some(bytes) => slots[index] = Some(bytes),
            None => {
                warn!(path = path, chunk_key = %keys[index], "Cached artifact is missing a chunk");
                return Err(CacheError::CorruptEntry {
                    path: path.to_string(),
                    chunk_key: keys[index].clone(),
                });
            }
        }
    }

    let chunks = slots
        .into_iter()
        .zip(keys)
        .map(|(slot, key)| {
            slot.ok_or_else(|| CacheError::CorruptEntry {
                path: path.to_string(),
                chunk_key: key.clone(),
            })
        })
        .collect::<CacheResult<Vec<_>>>()?;
    Ok(concatenate(chunks))
}

async fn release(conn: &dyn StoreConnection, path: &str) {
    if let Err(e) = conn.close().await {
        warn!(path = path, error = %e, "Failed to close store connection");
    }
}
