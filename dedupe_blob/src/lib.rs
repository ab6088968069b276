//! C4 — the blob adapter. The engine never talks to storage directly; it
//! calls through a `BlobBackend`, a trait grouping the three callbacks the
//! spec describes as independent closures ("callbacks as capabilities").
//!
//! The adapter never interprets keys and never maintains catalog-shaped
//! state — it is purely "store these bytes under this key".

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use dedupe_types::ChunkKey;
use observability_deps::tracing::warn;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("chunk {key} not found in blob backend")]
    NotFound { key: String },
    #[error("blob backend I/O error for chunk {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// The write/read/delete chunk callback contract, grouped into one trait.
/// Implementations may be called concurrently for distinct keys; writes to
/// the same key are idempotent since content is identical by construction.
pub trait BlobBackend: Send + Sync {
    /// Persist `bytes` under `key`. Must be crash-consistent: a reader must
    /// never observe a partially written chunk.
    fn write_chunk(&self, key: &ChunkKey, bytes: &[u8]) -> Result<(), Error>;

    /// Return the exact bytes previously written under `key`.
    fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<u8>, Error>;

    /// Best-effort removal. Absence of `key` is not an error.
    fn delete_chunk(&self, key: &ChunkKey) -> Result<(), Error>;
}

/// Chunks as files on disk, one per key, under a flat directory. Writes go
/// through a temporary file in the same directory followed by an atomic
/// rename, so a reader can never observe a half-written chunk — the same
/// write-through-then-rename discipline a content-addressed chunk store
/// needs to survive a crash mid-write.
pub struct FsBlobBackend {
    dir: PathBuf,
}

impl FsBlobBackend {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &ChunkKey) -> PathBuf {
        self.dir.join(key.as_str())
    }
}

impl BlobBackend for FsBlobBackend {
    fn write_chunk(&self, key: &ChunkKey, bytes: &[u8]) -> Result<(), Error> {
        let target = self.path_for(key);
        if target.exists() {
            // Content is identical by construction (key is a content hash),
            // so a concurrent or repeat write of the same key is a no-op.
            return Ok(());
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| Error::Io {
            key: key.to_string(),
            source: e,
        })?;
        use std::io::Write;
        tmp.write_all(bytes).map_err(|e| Error::Io {
            key: key.to_string(),
            source: e,
        })?;
        tmp.persist(&target).map_err(|e| Error::Io {
            key: key.to_string(),
            source: e.error,
        })?;
        Ok(())
    }

    fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<u8>, Error> {
        fs::read(self.path_for(key)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound {
                    key: key.to_string(),
                }
            } else {
                Error::Io {
                    key: key.to_string(),
                    source: e,
                }
            }
        })
    }

    fn delete_chunk(&self, key: &ChunkKey) -> Result<(), Error> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(chunk = %key, error = %e, "failed to delete chunk blob");
                Err(Error::Io {
                    key: key.to_string(),
                    source: e,
                })
            }
        }
    }
}

/// In-memory blob backend for tests and the in-process examples.
#[derive(Default)]
pub struct MemBlobBackend {
    chunks: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBlobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobBackend for MemBlobBackend {
    fn write_chunk(&self, key: &ChunkKey, bytes: &[u8]) -> Result<(), Error> {
        self.chunks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<u8>, Error> {
        self.chunks
            .lock()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    fn delete_chunk(&self, key: &ChunkKey) -> Result<(), Error> {
        self.chunks.lock().remove(key.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> ChunkKey {
        ChunkKey::new("d41d8cd98f00b204e9800998ecf8427e")
    }

    #[test]
    fn mem_backend_round_trips() {
        let backend = MemBlobBackend::new();
        let key = sample_key();
        backend.write_chunk(&key, b"hello").unwrap();
        assert_eq!(backend.read_chunk(&key).unwrap(), b"hello");
        backend.delete_chunk(&key).unwrap();
        assert!(backend.read_chunk(&key).is_err());
    }

    #[test]
    fn mem_backend_delete_of_missing_key_is_not_an_error() {
        let backend = MemBlobBackend::new();
        backend.delete_chunk(&sample_key()).unwrap();
    }

    #[test]
    fn fs_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBlobBackend::new(dir.path()).unwrap();
        let key = sample_key();
        backend.write_chunk(&key, b"hello").unwrap();
        assert_eq!(backend.read_chunk(&key).unwrap(), b"hello");
        backend.delete_chunk(&key).unwrap();
        assert!(matches!(
            backend.read_chunk(&key),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn fs_backend_repeat_write_of_same_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBlobBackend::new(dir.path()).unwrap();
        let key = sample_key();
        backend.write_chunk(&key, b"hello").unwrap();
        backend.write_chunk(&key, b"hello").unwrap();
        assert_eq!(backend.read_chunk(&key).unwrap(), b"hello");
    }
}
