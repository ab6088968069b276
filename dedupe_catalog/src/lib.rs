//! C3 — the relational catalog: `objects`, `chunks`, `object_map`, and a
//! single-row `config` table, backed by SQLite through `rusqlite`.
//!
//! Every operation takes the catalog's single mutex before touching the
//! connection, which is the entire concurrency story: one serialized writer
//! per catalog, and reads serialize against writers too rather than against
//! each other specifically — SQLite's own file-level locking does not by
//! itself give us the cross-statement atomicity a multi-row operation like
//! `DeleteObject` needs, so the engine-level mutex is the actual enforcement
//! point.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use dedupe_types::{CatalogConfig, ChunkKey, IndexStatistics, ObjectMapEntry, ObjectMeta};
use observability_deps::tracing::debug;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("catalog SQL error: {source}"))]
    Sql { source: rusqlite::Error },
    #[snafu(display("object '{key}' already exists"))]
    ObjectAlreadyExists { key: String },
    #[snafu(display("object '{key}' not found"))]
    NotFound { key: String },
    #[snafu(display("invalid catalog configuration: {source}"))]
    InvalidConfig { source: dedupe_types::ConfigError },
    #[snafu(display(
        "object '{key}' object_map covers {covered} of {expected} bytes: catalog is corrupt"
    ))]
    CorruptCatalog {
        key: String,
        covered: u64,
        expected: u64,
    },
    #[snafu(display("max_results must be <= 100, got {requested}"))]
    MaxResultsTooLarge { requested: u32 },
}

impl From<rusqlite::Error> for Error {
    fn from(source: rusqlite::Error) -> Self {
        Error::Sql { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether this catalog instance owns the `chunks` table, or defers chunk
/// identity/refcounting to another catalog entirely. Single-catalog
/// deployments and the federated pool catalog use `Owned`; federated
/// container catalogs use `External` — two profiles of one schema rather
/// than two separate implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTableOwner {
    Owned,
    External,
}

pub struct Catalog {
    conn: Mutex<Connection>,
    profile: ChunkTableOwner,
    config: Option<CatalogConfig>,
}

const SCHEMA_OBJECTS: &str = "
CREATE TABLE IF NOT EXISTS objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE NOT NULL,
    original_length INTEGER NOT NULL,
    compressed_length INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_utc TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS object_map (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    object_id INTEGER NOT NULL REFERENCES objects(id),
    chunk_key TEXT NOT NULL,
    chunk_length INTEGER NOT NULL,
    chunk_position INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_object_map_object_id ON object_map(object_id);
";

const SCHEMA_CHUNKS: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE NOT NULL,
    length INTEGER NOT NULL,
    ref_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// A pool catalog's container descriptor list (spec's federation wrapper,
/// C9). Harmless on a single-catalog deployment — the table exists but
/// stays empty, the same "two profiles, one abstraction" approach the rest
/// of this schema takes.
const SCHEMA_CONTAINERS: &str = "
CREATE TABLE IF NOT EXISTS containers (
    name TEXT PRIMARY KEY,
    index_path TEXT NOT NULL
);
";

impl Catalog {
    /// Initializes schema if absent and persists `config` (only meaningful
    /// for `ChunkTableOwner::Owned`, since chunking parameters govern chunk
    /// boundaries globally, not per-container). If a config row already
    /// exists, the caller's config is ignored and the stored one wins —
    /// the same "stored values win" rule `open` uses, so `create` against
    /// an already-initialized path behaves like `open`.
    pub fn create(
        path: impl AsRef<Path>,
        config: CatalogConfig,
        profile: ChunkTableOwner,
    ) -> Result<Self> {
        config.validate().map_err(|source| Error::InvalidConfig { source })?;
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_OBJECTS)?;
        conn.execute_batch(SCHEMA_CONTAINERS)?;
        if profile == ChunkTableOwner::Owned {
            conn.execute_batch(SCHEMA_CHUNKS)?;
        }
        let stored_config = if profile == ChunkTableOwner::Owned {
            Some(Self::load_or_store_config(&conn, config)?)
        } else {
            None
        };
        debug!(?profile, "catalog created");
        Ok(Self {
            conn: Mutex::new(conn),
            profile,
            config: stored_config,
        })
    }

    /// Opens an existing catalog, reading its stored config (for `Owned`
    /// catalogs). Caller-supplied config values are not accepted here by
    /// design: the on-disk config is the only one that matters once chunks
    /// have been written under it.
    pub fn open(path: impl AsRef<Path>, profile: ChunkTableOwner) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_OBJECTS)?;
        conn.execute_batch(SCHEMA_CONTAINERS)?;
        let config = if profile == ChunkTableOwner::Owned {
            conn.execute_batch(SCHEMA_CHUNKS)?;
            Some(Self::read_config(&conn)?.unwrap_or_else(CatalogConfig::with_defaults))
        } else {
            None
        };
        Ok(Self {
            conn: Mutex::new(conn),
            profile,
            config,
        })
    }

    pub fn config(&self) -> Option<CatalogConfig> {
        self.config
    }

    pub fn profile(&self) -> ChunkTableOwner {
        self.profile
    }

    fn read_config(conn: &Connection) -> Result<Option<CatalogConfig>> {
        let mut stmt = conn.prepare("SELECT key, value FROM config")?;
        let mut rows = stmt.query([])?;
        let mut min = None;
        let mut max = None;
        let mut shift = None;
        let mut boundary = None;
        while let Some(row) = rows.next()? {
            let k: String = row.get(0)?;
            let v: String = row.get(1)?;
            let parsed: u32 = v.parse().unwrap_or(0);
            match k.as_str() {
                "min_chunk_size" => min = Some(parsed),
                "max_chunk_size" => max = Some(parsed),
                "shift_count" => shift = Some(parsed),
                "boundary_check_bytes" => boundary = Some(parsed),
                _ => {}
            }
        }
        Ok(match (min, max, shift, boundary) {
            (Some(min_chunk_size), Some(max_chunk_size), Some(shift_count), Some(boundary_check_bytes)) => {
                Some(CatalogConfig {
                    min_chunk_size,
                    max_chunk_size,
                    shift_count,
                    boundary_check_bytes,
                })
            }
            _ => None,
        })
    }

    fn load_or_store_config(conn: &Connection, requested: CatalogConfig) -> Result<CatalogConfig> {
        if let Some(existing) = Self::read_config(conn)? {
            return Ok(existing);
        }
        let rows: [(&str, u32); 4] = [
            ("min_chunk_size", requested.min_chunk_size),
            ("max_chunk_size", requested.max_chunk_size),
            ("shift_count", requested.shift_count),
            ("boundary_check_bytes", requested.boundary_check_bytes),
        ];
        for (k, v) in rows {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)",
                params![k, v.to_string()],
            )?;
        }
        Ok(requested)
    }

    /// Begin a write transaction for the ingestion path. Kept as an
    /// explicit handle, rather than folded into one `insert_object` call,
    /// because the engine must call out to the blob backend *between*
    /// upserting each chunk's catalog row and committing the object — the
    /// ordering the write path depends on for crash safety.
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        let guard = self.conn.lock();
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(WriteTxn {
            guard,
            done: false,
        })
    }

    pub fn lookup_object(&self, key: &str) -> Result<(ObjectMeta, Vec<ObjectMapEntry>)> {
        let conn = self.conn.lock();
        let meta = Self::select_object(&conn, key)?.ok_or_else(|| Error::NotFound {
            key: key.to_string(),
        })?;
        let entries = Self::select_object_map(&conn, meta.id)?;
        let covered: u64 = entries.iter().map(|e| e.chunk_length).sum();
        if covered != meta.original_length {
            return Err(Error::CorruptCatalog {
                key: key.to_string(),
                covered,
                expected: meta.original_length,
            });
        }
        Ok((meta, entries))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(Self::select_object(&conn, key)?.is_some())
    }

    /// Removes an object, decrementing each referenced chunk's `ref_count`;
    /// chunks that reach zero are deleted from the catalog and returned so
    /// the caller can delete the corresponding blobs. A missing key is a
    /// no-op returning an empty set.
    pub fn delete_object(&self, key: &str) -> Result<Vec<ChunkKey>> {
        let conn = self.conn.lock();
        let meta = match Self::select_object(&conn, key)? {
            Some(meta) => meta,
            None => return Ok(Vec::new()),
        };
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<Vec<ChunkKey>> {
            let entries = Self::select_object_map(&conn, meta.id)?;
            let mut zero_ref = Vec::new();
            if self.profile == ChunkTableOwner::Owned {
                for entry in &entries {
                    if !decrement_chunk_row(&conn, &entry.chunk_key)? {
                        zero_ref.push(entry.chunk_key.clone());
                    }
                }
            }
            conn.execute(
                "DELETE FROM object_map WHERE object_id = ?1",
                params![meta.id],
            )?;
            conn.execute("DELETE FROM objects WHERE id = ?1", params![meta.id])?;
            Ok(zero_ref)
        })();
        match result {
            Ok(zero_ref) => {
                conn.execute_batch("COMMIT")?;
                Ok(zero_ref)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    pub fn enumerate(
        &self,
        prefix: Option<&str>,
        start_index: u32,
        max_results: u32,
    ) -> Result<Vec<ObjectMeta>> {
        if max_results > 100 {
            return Err(Error::MaxResultsTooLarge {
                requested: max_results,
            });
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, key, original_length, compressed_length, chunk_count, created_utc
             FROM objects
             WHERE (?1 IS NULL OR key LIKE ?1 || '%')
             ORDER BY key ASC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![prefix, max_results as i64, start_index as i64],
            Self::row_to_object_meta,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Registers or updates a container descriptor `(name, index_path)` on a
    /// pool catalog. A no-op table on a single-catalog deployment.
    pub fn register_container(&self, name: &str, index_path: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO containers (name, index_path) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET index_path = excluded.index_path",
            params![name, index_path],
        )?;
        Ok(())
    }

    pub fn containers(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name, index_path FROM containers ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn remove_container(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM containers WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Total objects matching `prefix`, ignoring `enumerate`'s pagination —
    /// used to populate an enumeration result's `total` field.
    pub fn count_matching(&self, prefix: Option<&str>) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE (?1 IS NULL OR key LIKE ?1 || '%')",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn statistics(&self) -> Result<IndexStatistics> {
        let conn = self.conn.lock();
        let objects: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |r| r.get(0))?;
        let logical_bytes: i64 = conn
            .query_row("SELECT COALESCE(SUM(original_length), 0) FROM objects", [], |r| {
                r.get(0)
            })?;
        let (chunks, physical_bytes): (i64, i64) = if self.profile == ChunkTableOwner::Owned {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(length), 0) FROM chunks",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?
        } else {
            (0, 0)
        };
        Ok(IndexStatistics::compute(
            objects as u64,
            chunks as u64,
            logical_bytes as u64,
            physical_bytes as u64,
        ))
    }

    fn select_object(conn: &Connection, key: &str) -> Result<Option<ObjectMeta>> {
        conn.query_row(
            "SELECT id, key, original_length, compressed_length, chunk_count, created_utc
             FROM objects WHERE key = ?1",
            params![key],
            Self::row_to_object_meta,
        )
        .optional()
        .map_err(Into::into)
    }

    fn select_object_map(conn: &Connection, object_id: i64) -> Result<Vec<ObjectMapEntry>> {
        let mut stmt = conn.prepare(
            "SELECT object_id, chunk_key, chunk_length, chunk_position
             FROM object_map WHERE object_id = ?1 ORDER BY chunk_position ASC",
        )?;
        let rows = stmt.query_map(params![object_id], |row| {
            Ok(ObjectMapEntry {
                object_id: row.get(0)?,
                chunk_key: ChunkKey::new(row.get::<_, String>(1)?),
                chunk_length: row.get::<_, i64>(2)? as u64,
                chunk_position: row.get::<_, i64>(3)? as u64,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn row_to_object_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectMeta> {
        let created_raw: String = row.get(5)?;
        let created_utc = parse_rfc3339(&created_raw);
        Ok(ObjectMeta {
            id: row.get(0)?,
            key: row.get(1)?,
            original_length: row.get::<_, i64>(2)? as u64,
            compressed_length: row.get::<_, i64>(3)? as u64,
            chunk_count: row.get::<_, i64>(4)? as u64,
            created_utc,
        })
    }
}

/// Decrements `key`'s ref_count, deleting the row if it reaches zero.
/// Returns whether the chunk row still exists afterward. Shared by
/// `Catalog::delete_object` (single-catalog path) and
/// `WriteTxn::decrement_chunk` (federated path, where the object/object_map
/// rows live in a different catalog than the one owning `chunks`).
fn decrement_chunk_row(conn: &Connection, key: &ChunkKey) -> Result<bool> {
    conn.execute(
        "UPDATE chunks SET ref_count = ref_count - 1 WHERE key = ?1",
        params![key.as_str()],
    )?;
    let ref_count: i64 = conn.query_row(
        "SELECT ref_count FROM chunks WHERE key = ?1",
        params![key.as_str()],
        |row| row.get(0),
    )?;
    if ref_count <= 0 {
        conn.execute("DELETE FROM chunks WHERE key = ?1", params![key.as_str()])?;
        Ok(false)
    } else {
        Ok(true)
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

/// A transaction in progress against a catalog's write mutex. Holds the
/// mutex guard for its entire lifetime, so no other catalog operation —
/// read or write — can interleave until it's committed or dropped.
pub struct WriteTxn<'a> {
    guard: MutexGuard<'a, Connection>,
    done: bool,
}

impl<'a> WriteTxn<'a> {
    /// `UpsertChunk`: increments `ref_count` for an existing chunk, or
    /// inserts it with `ref_count = 1`. Returns whether it already existed
    /// — the sole signal the caller needs to decide whether the blob
    /// backend must be asked to store the bytes.
    pub fn upsert_chunk(&mut self, key: &ChunkKey, length: u64) -> Result<bool> {
        let existing: Option<i64> = self
            .guard
            .query_row(
                "SELECT ref_count FROM chunks WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(_) => {
                self.guard.execute(
                    "UPDATE chunks SET ref_count = ref_count + 1 WHERE key = ?1",
                    params![key.as_str()],
                )?;
                Ok(true)
            }
            None => {
                self.guard.execute(
                    "INSERT INTO chunks (key, length, ref_count) VALUES (?1, ?2, 1)",
                    params![key.as_str(), length as i64],
                )?;
                Ok(false)
            }
        }
    }

    /// `InsertObject`: inserts the object row and its object_map rows, then
    /// commits. Fails with `ObjectAlreadyExists` — without having mutated
    /// anything — if `key` is already present.
    pub fn insert_object(
        mut self,
        key: &str,
        original_length: u64,
        entries: &[ObjectMapEntry],
    ) -> Result<ObjectMeta> {
        let already_exists: bool = self
            .guard
            .query_row(
                "SELECT 1 FROM objects WHERE key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if already_exists {
            self.rollback()?;
            return Err(Error::ObjectAlreadyExists {
                key: key.to_string(),
            });
        }
        let created_utc = Utc::now();
        self.guard.execute(
            "INSERT INTO objects (key, original_length, compressed_length, chunk_count, created_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                original_length as i64,
                original_length as i64,
                entries.len() as i64,
                created_utc.to_rfc3339(),
            ],
        )?;
        let object_id = self.guard.last_insert_rowid();
        for entry in entries {
            self.guard.execute(
                "INSERT INTO object_map (object_id, chunk_key, chunk_length, chunk_position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    object_id,
                    entry.chunk_key.as_str(),
                    entry.chunk_length as i64,
                    entry.chunk_position as i64,
                ],
            )?;
        }
        self.guard.execute_batch("COMMIT")?;
        self.done = true;
        Ok(ObjectMeta {
            id: object_id,
            key: key.to_string(),
            original_length,
            compressed_length: original_length,
            chunk_count: entries.len() as u64,
            created_utc,
        })
    }

    /// Decrements `key`'s ref_count by one, deleting the row if it reaches
    /// zero. Used by the federated write/delete paths, which upsert or
    /// decrement chunk rows against the pool catalog in one transaction
    /// without also inserting an object row here.
    pub fn decrement_chunk(&mut self, key: &ChunkKey) -> Result<bool> {
        decrement_chunk_row(&self.guard, key)
    }

    /// Commits the transaction without inserting an object row — the
    /// federated write path's phase 1: chunk upserts and blob writes commit
    /// against the pool catalog, then the object row is inserted separately
    /// against a container catalog.
    pub fn commit(mut self) -> Result<()> {
        self.guard.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.guard.execute_batch("ROLLBACK")?;
        self.done = true;
        Ok(())
    }
}

impl<'a> Drop for WriteTxn<'a> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.guard.execute_batch("ROLLBACK");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CatalogConfig {
        CatalogConfig {
            min_chunk_size: 4,
            max_chunk_size: 16,
            shift_count: 1,
            boundary_check_bytes: 2,
        }
    }

    fn write_simple_object(catalog: &Catalog, key: &str, chunk_key: &str, length: u64) -> ObjectMeta {
        let mut txn = catalog.begin_write().unwrap();
        let existed = txn.upsert_chunk(&ChunkKey::new(chunk_key), length).unwrap();
        assert!(!existed);
        txn.insert_object(
            key,
            length,
            &[ObjectMapEntry {
                object_id: 0,
                chunk_key: ChunkKey::new(chunk_key),
                chunk_length: length,
                chunk_position: 0,
            }],
        )
        .unwrap()
    }

    #[test]
    fn create_then_open_reads_stored_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
            assert_eq!(catalog.config(), Some(cfg()));
        }
        let reopened = Catalog::open(&path, ChunkTableOwner::Owned).unwrap();
        assert_eq!(reopened.config(), Some(cfg()));
    }

    #[test]
    fn reopen_ignores_caller_supplied_config_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        // Simulate a caller passing different params to `create` against an
        // already-initialized path: stored values should win.
        let mismatched = CatalogConfig {
            min_chunk_size: 64,
            ..cfg()
        };
        let catalog = Catalog::create(&path, mismatched, ChunkTableOwner::Owned).unwrap();
        assert_eq!(catalog.config(), Some(cfg()));
    }

    #[test]
    fn duplicate_write_is_rejected_without_mutating_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        write_simple_object(&catalog, "k", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 5);

        let mut txn = catalog.begin_write().unwrap();
        let existed = txn
            .upsert_chunk(&ChunkKey::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"), 5)
            .unwrap();
        assert!(existed);
        let err = txn
            .insert_object(
                "k",
                5,
                &[ObjectMapEntry {
                    object_id: 0,
                    chunk_key: ChunkKey::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
                    chunk_length: 5,
                    chunk_position: 0,
                }],
            )
            .unwrap_err();
        assert!(matches!(err, Error::ObjectAlreadyExists { .. }));

        let stats = catalog.statistics().unwrap();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.chunks, 1);
    }

    #[test]
    fn delete_decrements_refcount_and_reports_zero_ref_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        write_simple_object(&catalog, "a", "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 5);
        {
            let mut txn = catalog.begin_write().unwrap();
            let existed = txn
                .upsert_chunk(&ChunkKey::new("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"), 5)
                .unwrap();
            assert!(existed);
            txn.insert_object(
                "b",
                5,
                &[ObjectMapEntry {
                    object_id: 0,
                    chunk_key: ChunkKey::new("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
                    chunk_length: 5,
                    chunk_position: 0,
                }],
            )
            .unwrap();
        }

        let zero_ref = catalog.delete_object("a").unwrap();
        assert!(zero_ref.is_empty());

        let zero_ref = catalog.delete_object("b").unwrap();
        assert_eq!(
            zero_ref,
            vec![ChunkKey::new("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")]
        );

        let stats = catalog.statistics().unwrap();
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn delete_of_missing_key_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        assert!(catalog.delete_object("missing").unwrap().is_empty());
    }

    #[test]
    fn enumerate_respects_prefix_pagination_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        for (i, key) in ["b1", "a2", "a1", "c1"].iter().enumerate() {
            write_simple_object(&catalog, key, &format!("{:032x}", i), 4);
        }
        let page = catalog.enumerate(Some("a"), 0, 100).unwrap();
        let keys: Vec<&str> = page.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a1", "a2"]);

        let all = catalog.enumerate(None, 1, 2).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn container_registry_round_trips_and_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let pool = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        pool.register_container("alpha", "/data/alpha.db").unwrap();
        pool.register_container("beta", "/data/beta.db").unwrap();
        assert_eq!(
            pool.containers().unwrap(),
            vec![
                ("alpha".to_string(), "/data/alpha.db".to_string()),
                ("beta".to_string(), "/data/beta.db".to_string()),
            ]
        );
        pool.register_container("alpha", "/data/alpha2.db").unwrap();
        assert_eq!(
            pool.containers().unwrap()[0],
            ("alpha".to_string(), "/data/alpha2.db".to_string())
        );
        pool.remove_container("beta").unwrap();
        assert_eq!(pool.containers().unwrap().len(), 1);
    }

    #[test]
    fn enumerate_rejects_over_large_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let catalog = Catalog::create(&path, cfg(), ChunkTableOwner::Owned).unwrap();
        assert!(matches!(
            catalog.enumerate(None, 0, 101),
            Err(Error::MaxResultsTooLarge { .. })
        ));
    }
}
