//! End-to-end scenarios S1-S7, run against the exact chunker configuration
//! named alongside them: `min=4, max=16, shift=1, boundary=2`.

use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use dedupe_blob::{BlobBackend, Error as BlobError, MemBlobBackend};
use dedupe_engine::Engine;
use dedupe_types::{CatalogConfig, ChunkKey};

fn scenario_config() -> CatalogConfig {
    CatalogConfig {
        min_chunk_size: 4,
        max_chunk_size: 16,
        shift_count: 1,
        boundary_check_bytes: 2,
    }
}

/// Wraps `MemBlobBackend` to record which keys `delete_chunk` was actually
/// called with, so S4/S5 can assert on invocation rather than just on
/// catalog-visible ref counts.
struct TrackingBlobBackend {
    inner: MemBlobBackend,
    deleted: Mutex<Vec<ChunkKey>>,
}

impl TrackingBlobBackend {
    fn new() -> Self {
        Self {
            inner: MemBlobBackend::new(),
            deleted: Mutex::new(Vec::new()),
        }
    }

    fn deleted_keys(&self) -> Vec<ChunkKey> {
        self.deleted.lock().unwrap().clone()
    }
}

impl BlobBackend for TrackingBlobBackend {
    fn write_chunk(&self, key: &ChunkKey, bytes: &[u8]) -> Result<(), BlobError> {
        self.inner.write_chunk(key, bytes)
    }

    fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<u8>, BlobError> {
        self.inner.read_chunk(key)
    }

    fn delete_chunk(&self, key: &ChunkKey) -> Result<(), BlobError> {
        self.deleted.lock().unwrap().push(key.clone());
        self.inner.delete_chunk(key)
    }
}

fn engine_with(blob: Arc<TrackingBlobBackend>) -> Engine {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");
    std::mem::forget(dir);
    Engine::create(path, scenario_config(), blob).unwrap()
}

#[test]
fn s1_write_then_get_round_trips_with_expected_stats() {
    let engine = engine_with(Arc::new(TrackingBlobBackend::new()));
    engine.write("k", b"hello").unwrap();

    let data = engine.get_full("k").unwrap().unwrap();
    assert_eq!(data, b"hello");

    let stats = engine.index_stats().unwrap();
    assert_eq!(stats.objects, 1);
    assert_eq!(stats.logical_bytes, 5);
    assert_eq!(stats.physical_bytes, 5);
}

#[test]
fn s2_rewriting_an_existing_key_is_rejected_and_catalog_is_unchanged() {
    let engine = engine_with(Arc::new(TrackingBlobBackend::new()));
    engine.write("k", b"hello").unwrap();
    let before = engine.index_stats().unwrap();

    let err = engine.write("k", b"x").unwrap_err();
    assert!(matches!(err, dedupe_engine::Error::ObjectAlreadyExists { .. }));

    let after = engine.index_stats().unwrap();
    assert_eq!(before, after);
    assert_eq!(engine.get_full("k").unwrap().unwrap(), b"hello");
}

#[test]
fn s3_writing_duplicate_content_creates_no_new_chunks_and_doubles_refcounts() {
    let engine = engine_with(Arc::new(TrackingBlobBackend::new()));
    let payload: Vec<u8> = (0..100_000u32).map(|n| (n % 256) as u8).collect();

    engine.write("a", &payload).unwrap();
    let stats_after_first = engine.index_stats().unwrap();

    engine.write("b", &payload).unwrap();
    let stats_after_second = engine.index_stats().unwrap();

    assert_eq!(stats_after_second.chunks, stats_after_first.chunks);
    assert_eq!(stats_after_second.objects, 2);
    assert_eq!(stats_after_second.physical_bytes, stats_after_first.physical_bytes);
}

#[test]
fn s4_then_s5_deleting_each_copy_in_turn_only_frees_blobs_on_the_last_delete() {
    let blob = Arc::new(TrackingBlobBackend::new());
    let engine = engine_with(Arc::clone(&blob));
    let payload: Vec<u8> = (0..100_000u32).map(|n| (n % 256) as u8).collect();
    engine.write("a", &payload).unwrap();
    engine.write("b", &payload).unwrap();
    let chunk_count_before_delete = engine.index_stats().unwrap().chunks;

    // S4: deleting the first copy must not invoke delete_chunk at all — every
    // chunk is still referenced by "b".
    engine.delete("a").unwrap();
    assert!(blob.deleted_keys().is_empty());
    let stats_after_a = engine.index_stats().unwrap();
    assert_eq!(stats_after_a.chunks, chunk_count_before_delete);
    assert_eq!(stats_after_a.objects, 1);

    // S5: deleting the last copy removes every chunk row and invokes
    // delete_chunk exactly once per chunk key.
    engine.delete("b").unwrap();
    let stats_after_b = engine.index_stats().unwrap();
    assert_eq!(stats_after_b.chunks, 0);
    assert_eq!(stats_after_b.objects, 0);
    assert_eq!(blob.deleted_keys().len() as u64, chunk_count_before_delete);
}

#[test]
fn s6_then_s7_seeking_within_a_stream_reads_the_exact_byte_range_and_stats_show_dedup_ratio() {
    let engine = engine_with(Arc::new(TrackingBlobBackend::new()));
    let mut seed = 0x1234_5678u32;
    let payload: Vec<u8> = (0..1_048_576u32)
        .map(|_| {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (seed >> 16) as u8
        })
        .collect();
    engine.write("k", &payload).unwrap();

    let mut stream = engine.get_stream("k").unwrap().unwrap();
    stream.seek(SeekFrom::Start(500_000)).unwrap();
    let mut buf = [0u8; 4096];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &payload[500_000..504_096]);

    let stats = engine.index_stats().unwrap();
    assert_eq!(stats.objects, 1);
    assert_eq!(stats.logical_bytes, 1_048_576);
    assert!(stats.ratio_x >= 1.0);
}

#[test]
fn invariant_stream_reconstruction_matches_full_read_for_arbitrary_buffer_sizes() {
    let engine = engine_with(Arc::new(TrackingBlobBackend::new()));
    let payload: Vec<u8> = (0..20_000u32).map(|n| (n % 251) as u8).collect();
    engine.write("k", &payload).unwrap();
    let full = engine.get_full("k").unwrap().unwrap();

    for buf_size in [1usize, 3, 7, 64, 4096] {
        let mut stream = engine.get_stream("k").unwrap().unwrap();
        let mut collected = Vec::new();
        let mut buf = vec![0u8; buf_size];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, full, "buffer size {buf_size} produced a mismatched read");
    }
}
