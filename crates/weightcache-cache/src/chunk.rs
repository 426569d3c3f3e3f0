//! Chunk planning and reassembly

use std::num::NonZeroUsize;

use weightcache_core::{CacheError, CacheResult};

/// One contiguous slice `[start, end)` of a payload, stored under `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Chunk table key
    pub key: String,
    /// First byte offset (inclusive)
    pub start: usize,
    /// Last byte offset (exclusive)
    pub end: usize,
}

impl ChunkSpan {
    /// Length of the span in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span covers no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The bytes of `payload` this span covers
    pub fn slice<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        &payload[self.start..self.end]
    }
}

/// Deterministic chunk key for chunk `index` of the artifact at `path`
pub fn chunk_key(path: &str, index: usize) -> String {
    format!("{}_{}", path, index)
}

/// Splits payloads into bounded-size chunks
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    max_chunk_size: NonZeroUsize,
}

impl ChunkPlanner {
    /// Create a planner. `max_chunk_size` must be positive.
    pub fn new(max_chunk_size: usize) -> CacheResult<Self> {
        let max_chunk_size = NonZeroUsize::new(max_chunk_size).ok_or_else(|| {
            CacheError::Config("max_chunk_size must be positive".to_string())
        })?;
        Ok(Self { max_chunk_size })
    }

    /// Maximum chunk size in bytes
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size.get()
    }

    /// Whether a payload of `payload_len` bytes is stored as chunks
    pub fn needs_chunking(&self, payload_len: usize) -> bool {
        payload_len > self.max_chunk_size.get()
    }

    /// Ordered chunk spans covering `[0, payload_len)`.
    ///
    /// Returns an empty plan for an empty payload.
    pub fn plan(&self, payload_len: usize, path: &str) -> Vec<ChunkSpan> {
        let max = self.max_chunk_size.get();
        (0..payload_len.div_ceil(max))
            .map(|index| {
                let start = index * max;
                ChunkSpan {
                    key: chunk_key(path, index),
                    start,
                    end: (start + max).min(payload_len),
                }
            })
            .collect()
    }
}

/// Join chunks, in the given order, into one contiguous buffer
pub fn concatenate(chunks: Vec<Vec<u8>>) -> Vec<u8> {
    let total = chunks.iter().map(Vec::len).sum();
    let mut buffer = Vec::with_capacity(total);
    for chunk in chunks {
        buffer.extend_from_slice(&chunk);
    }
    buffer
}
