//! Content-defined chunking: the MD5-window boundary predicate (C1) and the
//! streaming chunker built on top of it (C2).
//!
//! Chunk boundaries depend only on the bytes under the sliding window and on
//! `CatalogConfig`, never on anything upstream of the current candidate
//! chunk's start — this is what lets identical content produce identical
//! chunks regardless of which object it first appeared in.

use std::io::{self, Read};

use dedupe_types::{CatalogConfig, Chunk, ChunkKey};
use digest::Digest;
use md5::Md5;

/// Hex-encoded MD5 of `bytes`. This is both a chunk's catalog identity and
/// the input to the boundary predicate.
pub fn md5_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// True when `window`'s MD5 begins with `check_bytes` zero bytes. A
/// `check_bytes` greater than 16 (the MD5 digest length) can never match.
pub fn is_boundary(window: &[u8], check_bytes: usize) -> bool {
    if check_bytes > 16 {
        return false;
    }
    let digest = Md5::digest(window);
    digest[..check_bytes].iter().all(|&b| b == 0)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error reading from data source: {0}")]
    Io(#[from] io::Error),
}

/// Streaming splitter over a finite byte source of known length. Produces
/// chunks in increasing offset order, never holding more than
/// `max_chunk_size` unconsumed bytes in memory.
pub struct Chunker<R> {
    source: R,
    config: CatalogConfig,
    /// Bytes read from `source` starting at `p` (the current candidate
    /// chunk's start) that have not yet been emitted as part of a chunk.
    buffer: Vec<u8>,
    /// Absolute position of the start of `buffer` within the source.
    p: u64,
    /// Total length of the source.
    length: u64,
    eof: bool,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(source: R, length: u64, config: CatalogConfig) -> Self {
        Self {
            source,
            config,
            buffer: Vec::new(),
            p: 0,
            length,
            eof: false,
            done: false,
        }
    }

    /// Ensure `buffer` holds at least `want` bytes (or everything remaining,
    /// if the source runs out first).
    fn fill_to(&mut self, want: usize) -> Result<(), Error> {
        while self.buffer.len() < want && !self.eof {
            let mut tmp = [0u8; 8192];
            let to_read = tmp.len().min(want - self.buffer.len());
            let n = self.source.read(&mut tmp[..to_read])?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&tmp[..n]);
            }
        }
        Ok(())
    }

    fn emit(&mut self, rel_len: usize) -> Chunk {
        let data: Vec<u8> = self.buffer.drain(..rel_len).collect();
        let offset = self.p;
        self.p += rel_len as u64;
        let key = ChunkKey::new(md5_hex(&data));
        Chunk {
            key,
            offset,
            length: data.len() as u64,
            data,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>, Error> {
        if self.done || self.p >= self.length {
            return Ok(None);
        }
        let remaining = self.length - self.p;
        let min = self.config.min_chunk_size as u64;
        let max = self.config.max_chunk_size as u64;
        let check = self.config.boundary_check_bytes as usize;
        let shift = self.config.shift_count as u64;

        if remaining <= min {
            self.fill_to(remaining as usize)?;
            self.done = true;
            return Ok(Some(self.emit(remaining as usize)));
        }

        let mut c_rel = min - self.config.boundary_check_bytes as u64;
        loop {
            let end_rel = c_rel + check as u64;
            if end_rel > remaining {
                // Ran out of source before a boundary or a forced cut —
                // emit whatever is left as the final chunk.
                self.fill_to(remaining as usize)?;
                self.done = true;
                return Ok(Some(self.emit(remaining as usize)));
            }
            self.fill_to(end_rel as usize)?;
            let window = &self.buffer[c_rel as usize..end_rel as usize];
            if is_boundary(window, check) {
                return Ok(Some(self.emit(end_rel as usize)));
            }
            c_rel += shift;
            if c_rel + check as u64 > max {
                self.fill_to(max as usize)?;
                return Ok(Some(self.emit(max as usize)));
            }
        }
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Chunk, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Convenience entry point for chunking an in-memory buffer.
pub fn chunk_bytes(data: &[u8], config: CatalogConfig) -> Result<Vec<Chunk>, Error> {
    let cursor = io::Cursor::new(data);
    Chunker::new(cursor, data.len() as u64, config).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_config() -> CatalogConfig {
        CatalogConfig {
            min_chunk_size: 4,
            max_chunk_size: 16,
            shift_count: 1,
            boundary_check_bytes: 2,
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunk_bytes(b"", small_config()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_input_is_one_tail_chunk() {
        let chunks = chunk_bytes(b"hello", small_config()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].data, b"hello");
    }

    #[test]
    fn chunks_cover_input_contiguously_without_gaps() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|n| n.to_le_bytes()).collect();
        let chunks = chunk_bytes(&data, small_config()).unwrap();
        let mut expect_offset = 0u64;
        let mut rebuilt = Vec::with_capacity(data.len());
        for chunk in &chunks {
            assert_eq!(chunk.offset, expect_offset);
            expect_offset += chunk.length;
            rebuilt.extend_from_slice(&chunk.data);
        }
        assert_eq!(expect_offset, data.len() as u64);
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn every_chunk_but_the_last_respects_size_bounds() {
        let data: Vec<u8> = (0..50_000u32).flat_map(|n| n.to_le_bytes()).collect();
        let cfg = small_config();
        let chunks = chunk_bytes(&data, cfg).unwrap();
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.length >= cfg.min_chunk_size as u64);
            assert!(chunk.length <= cfg.max_chunk_size as u64);
        }
    }

    #[test]
    fn identical_bytes_produce_identical_chunk_keys() {
        let data: Vec<u8> = (0..20_000u32).flat_map(|n| (n * 7).to_le_bytes()).collect();
        let cfg = small_config();
        let first = chunk_bytes(&data, cfg).unwrap();
        let second = chunk_bytes(&data, cfg).unwrap();
        assert_eq!(
            first.iter().map(|c| &c.key).collect::<Vec<_>>(),
            second.iter().map(|c| &c.key).collect::<Vec<_>>()
        );
    }

    proptest! {
        #[test]
        fn prop_chunking_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let cfg = small_config();
            let a = chunk_bytes(&data, cfg).unwrap();
            let b = chunk_bytes(&data, cfg).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_chunks_reconstruct_the_input(data in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let cfg = small_config();
            let chunks = chunk_bytes(&data, cfg).unwrap();
            let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
            prop_assert_eq!(rebuilt, data);
        }
    }
}
