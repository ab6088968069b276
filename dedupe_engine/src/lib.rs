//! The public library surface: `Engine` composes the chunker, the catalog,
//! and a blob backend into the write path, read path, delete path, and
//! enumeration/stats.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use dedupe_blob::BlobBackend;
use dedupe_catalog::{Catalog, ChunkTableOwner};
use dedupe_chunker::Chunker;
use dedupe_types::{CatalogConfig, ChunkKey, IndexStatistics, ObjectMapEntry, ObjectMeta};
use observability_deps::tracing::{info, warn};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },
    #[snafu(display("object '{key}' already exists"))]
    ObjectAlreadyExists { key: String },
    #[snafu(display("object '{key}' not found"))]
    NotFound { key: String },
    #[snafu(display(
        "object '{key}' object_map covers {covered} of {expected} bytes: catalog is corrupt"
    ))]
    CorruptCatalog {
        key: String,
        covered: u64,
        expected: u64,
    },
    #[snafu(display("catalog error: {source}"))]
    Catalog { source: dedupe_catalog::Error },
    #[snafu(display("chunker error: {source}"))]
    Chunker { source: dedupe_chunker::Error },
    #[snafu(display("blob backend error writing chunk: {source}"))]
    BlobWrite { source: dedupe_blob::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<dedupe_catalog::Error> for Error {
    fn from(e: dedupe_catalog::Error) -> Self {
        match e {
            dedupe_catalog::Error::ObjectAlreadyExists { key } => {
                Error::ObjectAlreadyExists { key }
            }
            dedupe_catalog::Error::NotFound { key } => Error::NotFound { key },
            dedupe_catalog::Error::CorruptCatalog {
                key,
                covered,
                expected,
            } => Error::CorruptCatalog {
                key,
                covered,
                expected,
            },
            other => Error::Catalog { source: other },
        }
    }
}

impl From<dedupe_chunker::Error> for Error {
    fn from(source: dedupe_chunker::Error) -> Self {
        Error::Chunker { source }
    }
}

/// The engine: a catalog plus the blob backend it was constructed with.
/// Cheap to clone (the blob backend is behind an `Arc`); the catalog
/// enforces its own single-writer discipline internally.
pub struct Engine {
    catalog: Catalog,
    blob: Arc<dyn BlobBackend>,
}

impl Engine {
    pub fn create(
        catalog_path: impl AsRef<std::path::Path>,
        config: CatalogConfig,
        blob: Arc<dyn BlobBackend>,
    ) -> Result<Self> {
        let catalog = Catalog::create(catalog_path, config, ChunkTableOwner::Owned)?;
        Ok(Self { catalog, blob })
    }

    pub fn open(
        catalog_path: impl AsRef<std::path::Path>,
        blob: Arc<dyn BlobBackend>,
    ) -> Result<Self> {
        let catalog = Catalog::open(catalog_path, ChunkTableOwner::Owned)?;
        Ok(Self { catalog, blob })
    }

    fn require_config(&self) -> CatalogConfig {
        self.catalog
            .config()
            .expect("an Owned-profile catalog always carries chunking config")
    }

    fn check_new_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument {
                message: "key must not be empty".to_string(),
            });
        }
        if self.catalog.exists(key)? {
            return Err(Error::ObjectAlreadyExists {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// `Write(key, bytes)`.
    pub fn write(&self, key: &str, data: &[u8]) -> Result<ObjectMeta> {
        self.check_new_key(key)?;
        let chunks = dedupe_chunker::chunk_bytes(data, self.require_config())?;
        self.commit_chunks(key, data.len() as u64, chunks)
    }

    /// `Write(key, content_length, stream)`.
    pub fn write_stream<R: Read>(
        &self,
        key: &str,
        content_length: u64,
        reader: R,
    ) -> Result<ObjectMeta> {
        self.check_new_key(key)?;
        let chunker = Chunker::new(reader, content_length, self.require_config());
        let chunks = chunker.collect::<std::result::Result<Vec<_>, _>>()?;
        self.commit_chunks(key, content_length, chunks)
    }

    fn commit_chunks(
        &self,
        key: &str,
        original_length: u64,
        chunks: Vec<dedupe_types::Chunk>,
    ) -> Result<ObjectMeta> {
        let mut txn = self.catalog.begin_write()?;
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let existed = txn.upsert_chunk(&chunk.key, chunk.length)?;
            if !existed {
                self.blob
                    .write_chunk(&chunk.key, &chunk.data)
                    .map_err(|source| Error::BlobWrite { source })?;
            }
            entries.push(ObjectMapEntry {
                object_id: 0,
                chunk_key: chunk.key.clone(),
                chunk_length: chunk.length,
                chunk_position: chunk.offset,
            });
        }
        let meta = txn.insert_object(key, original_length, &entries)?;
        info!(key, chunks = entries.len(), "object written");
        Ok(meta)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.catalog.exists(key)?)
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.catalog.lookup_object(key) {
            Ok((meta, _)) => Ok(Some(meta)),
            Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_stream(&self, key: &str) -> Result<Option<ObjectStream>> {
        match self.catalog.lookup_object(key) {
            Ok((meta, entries)) => Ok(Some(ObjectStream::new(
                meta.original_length,
                entries,
                Arc::clone(&self.blob),
            ))),
            Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `Get(key) -> Object?`: metadata plus a stream over the same object.
    pub fn get(&self, key: &str) -> Result<Option<DedupeObject>> {
        match self.catalog.lookup_object(key) {
            Ok((meta, entries)) => {
                let stream = ObjectStream::new(
                    meta.original_length,
                    entries,
                    Arc::clone(&self.blob),
                );
                Ok(Some(DedupeObject { meta, stream }))
            }
            Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `GetFull(key)`: materializes the whole object into one buffer. The
    /// object_map is already verified to cover the object's full length by
    /// `lookup_object`, so a short read here means the blob backend itself
    /// came back short — not a key lookup failure.
    pub fn get_full(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut object) = self.get(key)? else {
            return Ok(None);
        };
        let mut buf = vec![0u8; object.meta.original_length as usize];
        object.stream.read_exact(&mut buf).map_err(|_| Error::CorruptCatalog {
            key: key.to_string(),
            covered: 0,
            expected: object.meta.original_length,
        })?;
        Ok(Some(buf))
    }

    /// `Delete(key)`: removes the object and deletes every chunk whose
    /// reference count reached zero. Blob-delete failures are logged, never
    /// propagated — the catalog is authoritative.
    pub fn delete(&self, key: &str) -> Result<()> {
        let zero_ref = self.catalog.delete_object(key)?;
        for chunk_key in zero_ref {
            if let Err(source) = self.blob.delete_chunk(&chunk_key) {
                warn!(chunk = %chunk_key, error = %source, "failed to delete chunk blob; catalog state is authoritative");
            }
        }
        Ok(())
    }

    pub fn list_objects(
        &self,
        prefix: Option<&str>,
        start_index: u32,
        max_results: u32,
    ) -> Result<EnumerationResult> {
        let objects = self.catalog.enumerate(prefix, start_index, max_results)?;
        let total = self.catalog.count_matching(prefix)?;
        Ok(EnumerationResult {
            objects,
            start_index,
            max_results,
            total: Some(total),
        })
    }

    pub fn index_stats(&self) -> Result<IndexStatistics> {
        Ok(self.catalog.statistics()?)
    }

    pub fn config(&self) -> CatalogConfig {
        self.require_config()
    }
}

/// Object metadata plus a stream positioned at the start of the object.
pub struct DedupeObject {
    pub meta: ObjectMeta,
    pub stream: ObjectStream,
}

#[derive(Debug, Clone)]
pub struct EnumerationResult {
    pub objects: Vec<ObjectMeta>,
    pub start_index: u32,
    pub max_results: u32,
    pub total: Option<u64>,
}

/// C6's virtual view over an object: no bytes are held beyond the single
/// most-recently-read chunk. `Read`/`Seek` are implemented directly so the
/// stream composes with anything generic over those traits (a buffered
/// reader, `io::copy`, a CLI writing to stdout).
pub struct ObjectStream {
    entries: Vec<ObjectMapEntry>,
    length: u64,
    position: u64,
    blob: Arc<dyn BlobBackend>,
    cached: Option<(ChunkKey, Vec<u8>)>,
}

impl ObjectStream {
    /// Exposed so `dedupe_federation` can build a stream over object_map
    /// entries read from a container catalog against the pool's blob
    /// backend, without duplicating this type.
    pub fn new(length: u64, entries: Vec<ObjectMapEntry>, blob: Arc<dyn BlobBackend>) -> Self {
        Self {
            entries,
            length,
            position: 0,
            blob,
            cached: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn locate(&self, pos: u64) -> usize {
        self.entries
            .partition_point(|e| e.chunk_position + e.chunk_length <= pos)
    }

    fn chunk_bytes(&mut self, entry: &ObjectMapEntry) -> io::Result<()> {
        if let Some((cached_key, _)) = &self.cached {
            if cached_key == &entry.chunk_key {
                return Ok(());
            }
        }
        let data = self
            .blob
            .read_chunk(&entry.chunk_key)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.cached = Some((entry.chunk_key.clone(), data));
        Ok(())
    }
}

impl Read for ObjectStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() && self.position < self.length {
            let idx = self.locate(self.position);
            let entry = self.entries[idx].clone();
            self.chunk_bytes(&entry)?;
            let (_, data) = self.cached.as_ref().expect("just populated above");
            let rel = (self.position - entry.chunk_position) as usize;
            let available = data.len() - rel;
            let want = (buf.len() - written).min(available);
            buf[written..written + want].copy_from_slice(&data[rel..rel + want]);
            written += want;
            self.position += want as u64;
        }
        Ok(written)
    }
}

impl Seek for ObjectStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let candidate: i128 = match pos {
            SeekFrom::Start(p) => p as i128,
            SeekFrom::End(p) => self.length as i128 + p as i128,
            SeekFrom::Current(p) => self.position as i128 + p as i128,
        };
        if candidate < 0 || candidate as u64 > self.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek position out of bounds",
            ));
        }
        self.position = candidate as u64;
        Ok(self.position)
    }
}
