//! C9 — the federation wrapper: a pool catalog holding the global `chunks`
//! table and a container descriptor list, fronting per-container catalogs
//! that hold only `objects`/`object_map`. Chunk identity and ref-counting
//! are global; object identity is scoped to a container.
//!
//! Writes land in two phases rather than one shared transaction, since the
//! pool and a container live in different SQLite files: phase 1 upserts
//! chunk rows and writes new blob bytes against the pool catalog and
//! commits; phase 2 inserts the object/object_map rows against the
//! container catalog. This is the acceptable fallback when a single
//! transaction can't span both stores. The two phases never hold the
//! pool's and a container's locks at the same time, so the required lock
//! order (pool before container) is satisfied trivially.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dedupe_blob::BlobBackend;
use dedupe_catalog::{Catalog, ChunkTableOwner};
use dedupe_engine::{DedupeObject, ObjectStream};
use dedupe_types::{CatalogConfig, IndexStatistics, ObjectMapEntry, ObjectMeta};
use observability_deps::tracing::{info, warn};
use parking_lot::Mutex;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },
    #[snafu(display("container '{name}' is not registered"))]
    UnknownContainer { name: String },
    #[snafu(display("container '{name}' is already registered"))]
    ContainerAlreadyRegistered { name: String },
    #[snafu(display("object '{key}' already exists"))]
    ObjectAlreadyExists { key: String },
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

/// The federated deployment shape: one pool catalog (global `chunks` table
/// plus the container descriptor list) and lazily-opened per-container
/// catalogs, all sharing one blob backend.
pub struct PoolCatalog {
    pool: Catalog,
    blob: Arc<dyn BlobBackend>,
    containers: Mutex<HashMap<String, Catalog>>,
}

impl PoolCatalog {
    pub fn create(
        pool_path: impl AsRef<Path>,
        config: CatalogConfig,
        blob: Arc<dyn BlobBackend>,
    ) -> Result<Self> {
        let pool = Catalog::create(pool_path, config, ChunkTableOwner::Owned)?;
        Ok(Self {
            pool,
            blob,
            containers: Mutex::new(HashMap::new()),
        })
    }

    pub fn open(pool_path: impl AsRef<Path>, blob: Arc<dyn BlobBackend>) -> Result<Self> {
        let pool = Catalog::open(pool_path, ChunkTableOwner::Owned)?;
        Ok(Self {
            pool,
            blob,
            containers: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a new container, creating its catalog file at `index_path`
    /// (External profile: no `chunks` table of its own).
    pub fn register_container(&self, name: &str, index_path: &str) -> Result<()> {
        let already_known = self
            .containers
            .lock()
            .contains_key(name)
            || self.pool.containers()?.iter().any(|(n, _)| n == name);
        if already_known {
            return Err(Error::ContainerAlreadyRegistered {
                name: name.to_string(),
            });
        }
        let config = self
            .pool
            .config()
            .expect("a pool catalog always carries chunking config");
        let catalog = Catalog::create(index_path, config, ChunkTableOwner::External)?;
        self.pool.register_container(name, index_path)?;
        self.containers.lock().insert(name.to_string(), catalog);
        info!(name, index_path, "container registered");
        Ok(())
    }

    /// `clist`: the registered container names.
    pub fn list_containers(&self) -> Result<Vec<String>> {
        Ok(self
            .pool
            .containers()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// `cexists`.
    pub fn container_exists(&self, name: &str) -> Result<bool> {
        Ok(self.pool.containers()?.iter().any(|(n, _)| n == name))
    }

    /// Deletes a container entirely: every object it holds is removed via
    /// the same per-object delete path `Delete(container, key)` uses (so
    /// each referenced chunk's ref_count is decremented and zero-ref chunks
    /// are dropped from the pool and the blob backend), and once the
    /// container is empty its descriptor is dropped from the pool's
    /// registry. A container with no objects deletes immediately.
    pub fn delete_container(&self, name: &str) -> Result<()> {
        if !self.container_exists(name)? {
            return Err(Error::UnknownContainer {
                name: name.to_string(),
            });
        }
        loop {
            let page = self.list_objects(name, None, 0, 100)?;
            if page.is_empty() {
                break;
            }
            for object in &page {
                self.delete(name, &object.key)?;
            }
        }
        self.containers.lock().remove(name);
        self.pool.remove_container(name)?;
        info!(name, "container deleted");
        Ok(())
    }

    fn with_container<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Catalog) -> Result<T>,
    ) -> Result<T> {
        let mut containers = self.containers.lock();
        if !containers.contains_key(name) {
            let path = self
                .pool
                .containers()?
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, path)| path)
                .ok_or_else(|| Error::UnknownContainer {
                    name: name.to_string(),
                })?;
            let catalog = Catalog::open(&path, ChunkTableOwner::External)?;
            containers.insert(name.to_string(), catalog);
        }
        let catalog = containers.get(name).expect("just inserted above");
        f(catalog)
    }

    /// `Write(container, key, bytes)`.
    pub fn write(&self, container: &str, key: &str, data: &[u8]) -> Result<ObjectMeta> {
        if key.is_empty() {
            return Err(Error::InvalidArgument {
                message: "key must not be empty".to_string(),
            });
        }
        let exists = self.with_container(container, |c| Ok(c.exists(key)?))?;
        if exists {
            return Err(Error::ObjectAlreadyExists {
                key: key.to_string(),
            });
        }

        let config = self
            .pool
            .config()
            .expect("a pool catalog always carries chunking config");
        let chunks = dedupe_chunker::chunk_bytes(data, config)?;

        let mut entries = Vec::with_capacity(chunks.len());
        {
            let mut txn = self.pool.begin_write()?;
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
            txn.commit()?;
        }

        let meta = self.with_container(container, |catalog| {
            let txn = catalog.begin_write()?;
            Ok(txn.insert_object(key, data.len() as u64, &entries)?)
        })?;
        info!(container, key, chunks = entries.len(), "object written");
        Ok(meta)
    }

    pub fn exists(&self, container: &str, key: &str) -> Result<bool> {
        self.with_container(container, |c| Ok(c.exists(key)?))
    }

    pub fn get_metadata(&self, container: &str, key: &str) -> Result<Option<ObjectMeta>> {
        self.with_container(container, |catalog| match catalog.lookup_object(key) {
            Ok((meta, _)) => Ok(Some(meta)),
            Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        })
    }

    pub fn get(&self, container: &str, key: &str) -> Result<Option<DedupeObject>> {
        self.with_container(container, |catalog| match catalog.lookup_object(key) {
            Ok((meta, entries)) => {
                let stream =
                    ObjectStream::new(meta.original_length, entries, Arc::clone(&self.blob));
                Ok(Some(DedupeObject { meta, stream }))
            }
            Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        })
    }

    /// `Delete(container, key)`: removes the object from its container,
    /// then decrements the pool's global ref_counts for the chunks it
    /// referenced, deleting blobs whose ref_count reaches zero.
    pub fn delete(&self, container: &str, key: &str) -> Result<()> {
        let entries: Option<Vec<ObjectMapEntry>> =
            self.with_container(container, |catalog| match catalog.lookup_object(key) {
                Ok((_, entries)) => Ok(Some(entries)),
                Err(dedupe_catalog::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            })?;
        let Some(entries) = entries else {
            return Ok(());
        };

        self.with_container(container, |catalog| {
            catalog.delete_object(key)?;
            Ok(())
        })?;

        let mut zero_ref = Vec::new();
        {
            let mut txn = self.pool.begin_write()?;
            for entry in &entries {
                if !txn.decrement_chunk(&entry.chunk_key)? {
                    zero_ref.push(entry.chunk_key.clone());
                }
            }
            txn.commit()?;
        }
        for chunk_key in zero_ref {
            if let Err(source) = self.blob.delete_chunk(&chunk_key) {
                warn!(chunk = %chunk_key, error = %source, "failed to delete chunk blob; pool catalog is authoritative");
            }
        }
        Ok(())
    }

    /// `olist`.
    pub fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
        start_index: u32,
        max_results: u32,
    ) -> Result<Vec<ObjectMeta>> {
        self.with_container(container, |c| {
            Ok(c.enumerate(prefix, start_index, max_results)?)
        })
    }

    /// `oexists` is `exists` scoped to a container — same operation, kept as
    /// a separate method name to mirror the CLI's distinct command.
    pub fn object_exists(&self, container: &str, key: &str) -> Result<bool> {
        self.exists(container, key)
    }

    /// Pool-wide `IndexStats`: chunk counts and physical bytes come from the
    /// pool's own `chunks` table; object counts and logical bytes are summed
    /// across every registered container.
    pub fn index_stats(&self) -> Result<IndexStatistics> {
        let pool_stats = self.pool.statistics()?;
        let names = self.list_containers()?;
        let mut objects = 0u64;
        let mut logical_bytes = 0u64;
        for name in &names {
            let stats = self.with_container(name, |c| Ok(c.statistics()?))?;
            objects += stats.objects;
            logical_bytes += stats.logical_bytes;
        }
        Ok(IndexStatistics::compute(
            objects,
            pool_stats.chunks,
            logical_bytes,
            pool_stats.physical_bytes,
        ))
    }
}
