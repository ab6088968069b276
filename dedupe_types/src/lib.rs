//! Plain data types shared by every crate in the deduplication engine
//! workspace. No crate in here talks to a catalog, a blob backend, or a
//! socket — it just defines the shapes those crates pass around.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hex-encoded MD5 digest of a chunk's bytes. Always 32 lowercase hex
/// characters; this is both the chunk's catalog key and its blob-backend
/// key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey(String);

impl ChunkKey {
    /// Wrap an already-computed hex digest. Does not validate the
    /// hex/length shape; callers that compute digests themselves (i.e.
    /// `dedupe_chunker::md5_hex`) are the only producers.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChunkKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<ChunkKey> for String {
    fn from(k: ChunkKey) -> Self {
        k.0
    }
}

/// A single content-defined chunk as emitted by the chunker: its key, its
/// position within the object it came from, and its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub key: ChunkKey,
    pub offset: u64,
    pub length: u64,
    pub data: Vec<u8>,
}

/// A catalog `chunks` row: identity, length, and the live reference count.
/// `ref_count` reaching zero means the row (and the backing blob) should be
/// removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRow {
    pub key: ChunkKey,
    pub length: u64,
    pub ref_count: u64,
}

/// A catalog `objects` row. `compressed_length` always equals
/// `original_length` in this engine — the column is reserved for a future
/// compression layer that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: i64,
    pub key: String,
    pub original_length: u64,
    pub compressed_length: u64,
    pub chunk_count: u64,
    pub created_utc: DateTime<Utc>,
}

/// One `object_map` row: binds an object to a chunk at a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMapEntry {
    pub object_id: i64,
    pub chunk_key: ChunkKey,
    pub chunk_length: u64,
    pub chunk_position: u64,
}

/// Chunker configuration, persisted once at catalog creation and immutable
/// thereafter — changing any of these on an existing catalog breaks chunk
/// reuse across every previously-written object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub min_chunk_size: u32,
    pub max_chunk_size: u32,
    pub shift_count: u32,
    pub boundary_check_bytes: u32,
}

impl CatalogConfig {
    /// The source's own defaults: 4KB minimum, 16KB maximum, 1-byte shift,
    /// a 2-byte boundary check window.
    pub fn with_defaults() -> Self {
        Self {
            min_chunk_size: 4096,
            max_chunk_size: 16384,
            shift_count: 1,
            boundary_check_bytes: 2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk_size == 0 || self.min_chunk_size >= self.max_chunk_size {
            return Err(ConfigError::MinMax {
                min: self.min_chunk_size,
                max: self.max_chunk_size,
            });
        }
        if self.shift_count == 0 {
            return Err(ConfigError::ShiftCount);
        }
        if self.boundary_check_bytes == 0 {
            return Err(ConfigError::BoundaryCheckBytes);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("min_chunk_size ({min}) must be greater than 0 and less than max_chunk_size ({max})")]
    MinMax { min: u32, max: u32 },
    #[error("shift_count must be at least 1")]
    ShiftCount,
    #[error("boundary_check_bytes must be at least 1")]
    BoundaryCheckBytes,
}

/// Derived statistics over an entire catalog. `ratio_x` and `ratio_pct` are
/// `0.0` when their denominator is zero, matching the source's own
/// collapsed-to-zero behavior rather than e.g. `NaN` or `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub objects: u64,
    pub chunks: u64,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub ratio_x: f64,
    pub ratio_pct: f64,
}

impl IndexStatistics {
    pub fn compute(objects: u64, chunks: u64, logical_bytes: u64, physical_bytes: u64) -> Self {
        let (ratio_x, ratio_pct) = if logical_bytes == 0 || physical_bytes == 0 {
            (0.0, 0.0)
        } else {
            let ratio_x = logical_bytes as f64 / physical_bytes as f64;
            let ratio_pct = 100.0 * (1.0 - physical_bytes as f64 / logical_bytes as f64);
            (ratio_x, ratio_pct)
        };
        Self {
            objects,
            chunks,
            logical_bytes,
            physical_bytes,
            ratio_x,
            ratio_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominators_collapse_to_zero() {
        let stats = IndexStatistics::compute(0, 0, 0, 0);
        assert_eq!(stats.ratio_x, 0.0);
        assert_eq!(stats.ratio_pct, 0.0);
    }

    #[test]
    fn ratio_reflects_dedup_savings() {
        let stats = IndexStatistics::compute(2, 3, 1_000_000, 500_000);
        assert_eq!(stats.ratio_x, 2.0);
        assert_eq!(stats.ratio_pct, 50.0);
    }

    #[test]
    fn config_rejects_inverted_bounds() {
        let cfg = CatalogConfig {
            min_chunk_size: 100,
            max_chunk_size: 50,
            shift_count: 1,
            boundary_check_bytes: 2,
        };
        assert!(cfg.validate().is_err());
    }
}
