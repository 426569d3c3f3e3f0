//! Cache-or-fetch loader for outer applications

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use weightcache_core::{Artifact, CacheConfig, CacheError, CacheResult};

use crate::cache::ArtifactCache;

/// Where artifacts come from when they are not cached
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch the artifact identified by `locator`
    async fn fetch(&self, locator: &str) -> CacheResult<Artifact>;
}

/// Artifact source reading local artifact directories.
///
/// `locator` names a directory under the root holding any of
/// `topology.json`, `specs.json` and `weights.bin`.
pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    pub const TOPOLOGY_FILE: &'static str = "topology.json";
    pub const SPECS_FILE: &'static str = "specs.json";
    pub const WEIGHTS_FILE: &'static str = "weights.bin";

    /// Create a source rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

async fn read_optional(path: &Path) -> CacheResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::Source(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn read_document(path: &Path) -> CacheResult<Option<serde_json::Value>> {
    match read_optional(path).await? {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            CacheError::Source(format!("Invalid JSON in {}: {}", path.display(), e))
        }),
        None => Ok(None),
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactSource {
    async fn fetch(&self, locator: &str) -> CacheResult<Artifact> {
        let dir = self.root.join(locator);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(CacheError::Source(format!(
                "No artifact directory at {}",
                dir.display()
            )));
        }

        let artifact = Artifact::new(
            read_document(&dir.join(Self::TOPOLOGY_FILE)).await?,
            read_document(&dir.join(Self::SPECS_FILE)).await?,
            read_optional(&dir.join(Self::WEIGHTS_FILE)).await?,
        );
        debug!(
            locator = locator,
            payload_bytes = artifact.payload_len(),
            "Fetched artifact from disk"
        );
        Ok(artifact)
    }
}

/// Serves artifacts from the cache, fetching and caching them on a miss
pub struct CachedLoader {
    cache: Option<ArtifactCache>,
    source: Arc<dyn ArtifactSource>,
}

impl CachedLoader {
    /// Create a loader backed by `cache`
    pub fn new(cache: ArtifactCache, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            cache: Some(cache),
            source,
        }
    }

    /// Create a loader that always fetches
    pub fn fetch_only(source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            cache: None,
            source,
        }
    }

    /// Create a loader from `config`, falling back to fetch-only when the
    /// platform has no usable store
    pub fn from_config(config: &CacheConfig, source: Arc<dyn ArtifactSource>) -> CacheResult<Self> {
        match ArtifactCache::from_config(config) {
            Ok(cache) => Ok(Self::new(cache, source)),
            Err(CacheError::UnsupportedPlatform(reason)) => {
                info!(reason = %reason, "No persistent store, loading without cache");
                Ok(Self::fetch_only(source))
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a cache is configured
    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Return the artifact cached under `path`, or fetch it from `locator`,
    /// cache it and return the reloaded copy
    pub async fn load_or_fetch(&self, locator: &str, path: &str) -> CacheResult<Artifact> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return self.source.fetch(locator).await,
        };
        if !cache.is_store_available().await {
            debug!(locator = locator, "Store unavailable, fetching directly");
            return self.source.fetch(locator).await;
        }

        match cache.load(path).await {
            Ok(Some(artifact)) => return Ok(artifact),
            Ok(None) => debug!(path = path, "Cache miss"),
            Err(e) if e.is_corrupt() => {
                // a fresh save rewrites the record and every chunk it references
                warn!(path = path, error = %e, "Corrupt cache entry, fetching again");
            }
            Err(e) => return Err(e),
        }

        let artifact = self.source.fetch(locator).await?;
        cache.save(path, artifact).await?;
        cache
            .load(path)
            .await?
            .ok_or_else(|| CacheError::Unavailable(format!("failed to get model '{}'", path)))
    }

    /// Bind a locator and cache path into a reusable loader handle
    pub fn bind(self: &Arc<Self>, locator: &str, path: &str) -> BoundLoader {
        BoundLoader {
            loader: Arc::clone(self),
            locator: locator.to_string(),
            path: path.to_string(),
        }
    }
}

/// A [`CachedLoader`] bound to one artifact
#[derive(Clone)]
pub struct BoundLoader {
    loader: Arc<CachedLoader>,
    locator: String,
    path: String,
}

impl BoundLoader {
    /// Load the bound artifact
    pub async fn load(&self) -> CacheResult<Artifact> {
        self.loader.load_or_fetch(&self.locator, &self.path).await
    }

    /// Locator the artifact is fetched from
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Cache path the artifact is stored under
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weightcache_core::{StorageBackend, Table};
    use weightcache_store::{MemoryStore, StoreOp};

    struct CountingSource {
        artifact: Artifact,
        fetches: AtomicUsize,
    }

    impl CountingSource {
        fn new(artifact: Artifact) -> Arc<Self> {
            Arc::new(Self {
                artifact,
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactSource for CountingSource {
        async fn fetch(&self, locator: &str) -> CacheResult<Artifact> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if locator == "broken" {
                return Err(CacheError::Source("remote unreachable".to_string()));
            }
            Ok(self.artifact.clone())
        }
    }

    fn sample() -> Artifact {
        Artifact::new(Some(json!({"layers": 3})), None, Some(vec![5; 23]))
    }

    fn loader_with(source: Arc<CountingSource>) -> (Arc<MemoryStore>, CachedLoader) {
        let store = Arc::new(MemoryStore::new());
        let cache = ArtifactCache::new(store.clone(), 10).unwrap();
        (store, CachedLoader::new(cache, source))
    }

    #[tokio::test]
    async fn test_fetches_once_then_serves_cache() {
        let source = CountingSource::new(sample());
        let (store, loader) = loader_with(source.clone());

        let first = loader.load_or_fetch("remote/m", "m").await.unwrap();
        let second = loader.load_or_fetch("remote/m", "m").await.unwrap();

        assert_eq!(first, sample());
        assert_eq!(second, sample());
        assert_eq!(source.fetches(), 1);
        assert_eq!(store.keys(Table::Chunk).await.len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_store_fetches_only() {
        let source = CountingSource::new(sample());
        let (store, loader) = loader_with(source.clone());
        store.set_available(false);

        loader.load_or_fetch("remote/m", "m").await.unwrap();
        loader.load_or_fetch("remote/m", "m").await.unwrap();

        assert_eq!(source.fetches(), 2);
        assert!(store.keys(Table::Artifact).await.is_empty());
    }

    #[tokio::test]
    async fn test_source_error_surfaces_unchanged() {
        let source = CountingSource::new(sample());
        let (_store, loader) = loader_with(source.clone());

        let err = loader.load_or_fetch("broken", "m").await.unwrap_err();
        assert_eq!(err.to_string(), "Artifact source error: remote unreachable");

        let fetch_only = CachedLoader::fetch_only(source);
        assert!(!fetch_only.is_caching());
        assert!(matches!(
            fetch_only.load_or_fetch("broken", "m").await,
            Err(CacheError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_save_failure_surfaces() {
        let source = CountingSource::new(sample());
        let (store, loader) = loader_with(source);
        store.fail_on(StoreOp::Put, Table::Chunk, "m_0").await;

        let err = loader.load_or_fetch("remote/m", "m").await.unwrap_err();
        assert!(matches!(err, CacheError::Storage(_)));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched() {
        let source = CountingSource::new(sample());
        let (store, loader) = loader_with(source.clone());

        loader.load_or_fetch("remote/m", "m").await.unwrap();
        store.remove(Table::Chunk, "m_1").await.unwrap();

        let artifact = loader.load_or_fetch("remote/m", "m").await.unwrap();
        assert_eq!(artifact, sample());
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_bound_loader() {
        let source = CountingSource::new(sample());
        let (_store, loader) = loader_with(source.clone());
        let bound = Arc::new(loader).bind("remote/m", "m");

        assert_eq!(bound.locator(), "remote/m");
        assert_eq!(bound.path(), "m");
        assert_eq!(bound.load().await.unwrap(), sample());
        assert_eq!(bound.clone().load().await.unwrap(), sample());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_from_config_unsupported_platform() {
        let source = CountingSource::new(sample());
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut config = CacheConfig::default();
        config.storage.backend = StorageBackend::Redb;
        config.storage.database_path = blocker.join("cache.redb");

        let loader = CachedLoader::from_config(&config, source.clone()).unwrap();
        assert!(!loader.is_caching());
        assert_eq!(loader.load_or_fetch("remote/m", "m").await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_fs_source() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("net");
        std::fs::create_dir(&model_dir).unwrap();
        std::fs::write(model_dir.join("topology.json"), br#"{"layers": 2}"#).unwrap();
        std::fs::write(model_dir.join("weights.bin"), vec![9u8; 40]).unwrap();

        let source = FsArtifactSource::new(dir.path());
        let artifact = source.fetch("net").await.unwrap();
        assert_eq!(artifact.topology, Some(json!({"layers": 2})));
        assert!(artifact.specs.is_none());
        assert_eq!(artifact.payload, Some(vec![9u8; 40]));

        assert!(matches!(
            source.fetch("missing").await,
            Err(CacheError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_source_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("net");
        std::fs::create_dir(&model_dir).unwrap();
        std::fs::write(model_dir.join("weights.bin"), vec![3u8; 95]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let cache = ArtifactCache::new(store.clone(), 10).unwrap();
        let loader = CachedLoader::new(cache, Arc::new(FsArtifactSource::new(dir.path())));

        let artifact = loader.load_or_fetch("net", "cached/net").await.unwrap();
        assert_eq!(artifact.payload, Some(vec![3u8; 95]));
        assert_eq!(store.keys(Table::Chunk).await.len(), 10);
    }
}
