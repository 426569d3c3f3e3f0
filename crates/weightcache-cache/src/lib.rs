//! weightcache-cache: Chunked artifact cache
//!
//! This crate provides the cache engine on top of the store:
//! - Chunk planning and reassembly
//! - Multi-table save/load with compensating rollback
//! - Cache-or-fetch loader for outer applications

pub mod cache;
pub mod chunk;
pub mod loader;
pub mod rollback;

pub use cache::ArtifactCache;
pub use chunk::{ChunkPlanner, ChunkSpan};
pub use loader::{ArtifactSource, BoundLoader, CachedLoader, FsArtifactSource};
pub use rollback::RollbackReport;
