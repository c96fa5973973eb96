//! Rolling checksum state for the data stream.
//!
//! Uncompressed data files carry two checksum artifacts: a `Crc` side file
//! with one CRC32 per fixed-size chunk of the logical stream, and a `Digest`
//! file with the CRC32 of the whole stream. Chunk boundaries are a property
//! of the logical stream, not of buffer flushes, so rewinding the sink can
//! restore checksum state from an in-memory snapshot without touching disk.

use byteorder::{BigEndian, WriteBytesExt};
use crc32fast::Hasher;

/// One-shot CRC32 of a byte slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Streaming checksum state fed on every sink write.
pub struct ChunkChecksum {
    /// Chunk size in logical bytes; zero disables per-chunk tracking
    /// (digest only).
    chunk_size: usize,
    /// CRCs of completed chunks, held in memory until prepare.
    chunk_crcs: Vec<u32>,
    chunk_hasher: Hasher,
    chunk_fill: usize,
    stream_hasher: Hasher,
}

/// Snapshot of checksum state, taken at `mark` and restored on rewind.
pub struct ChecksumMark {
    chunk_count: usize,
    chunk_hasher: Hasher,
    chunk_fill: usize,
    stream_hasher: Hasher,
}

impl ChunkChecksum {
    /// Tracks per-chunk CRCs for the `Crc` side file plus the stream digest.
    pub fn with_chunks(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self {
            chunk_size,
            chunk_crcs: Vec::new(),
            chunk_hasher: Hasher::new(),
            chunk_fill: 0,
            stream_hasher: Hasher::new(),
        }
    }

    /// Tracks only the stream digest (compressed data files embed their
    /// checksums per compressed chunk instead).
    pub fn digest_only() -> Self {
        Self {
            chunk_size: 0,
            chunk_crcs: Vec::new(),
            chunk_hasher: Hasher::new(),
            chunk_fill: 0,
            stream_hasher: Hasher::new(),
        }
    }

    pub fn update(&mut self, mut bytes: &[u8]) {
        self.stream_hasher.update(bytes);
        if self.chunk_size == 0 {
            return;
        }

        while !bytes.is_empty() {
            let remaining = self.chunk_size - self.chunk_fill;
            let take = remaining.min(bytes.len());
            self.chunk_hasher.update(&bytes[..take]);
            self.chunk_fill += take;
            bytes = &bytes[take..];

            if self.chunk_fill == self.chunk_size {
                let hasher = std::mem::take(&mut self.chunk_hasher);
                self.chunk_crcs.push(hasher.finalize());
                self.chunk_fill = 0;
            }
        }
    }

    pub fn mark(&self) -> ChecksumMark {
        ChecksumMark {
            chunk_count: self.chunk_crcs.len(),
            chunk_hasher: self.chunk_hasher.clone(),
            chunk_fill: self.chunk_fill,
            stream_hasher: self.stream_hasher.clone(),
        }
    }

    pub fn reset_to_mark(&mut self, mark: &ChecksumMark) {
        self.chunk_crcs.truncate(mark.chunk_count);
        self.chunk_hasher = mark.chunk_hasher.clone();
        self.chunk_fill = mark.chunk_fill;
        self.stream_hasher = mark.stream_hasher.clone();
    }

    /// CRC32 of everything fed so far.
    pub fn digest_value(&self) -> u32 {
        self.stream_hasher.clone().finalize()
    }

    /// Serialized `Crc` side file: chunk size, then one CRC per chunk
    /// including the final partial chunk.
    pub fn encode_crc_file(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.chunk_crcs.len() * 4);
        buf.write_u32::<BigEndian>(self.chunk_size as u32).unwrap();
        for crc in &self.chunk_crcs {
            buf.write_u32::<BigEndian>(*crc).unwrap();
        }
        if self.chunk_fill > 0 {
            buf.write_u32::<BigEndian>(self.chunk_hasher.clone().finalize())
                .unwrap();
        }
        buf
    }

    /// The `Digest` file payload: the stream CRC as a decimal line.
    pub fn encode_digest_file(&self) -> Vec<u8> {
        format!("{}\n", self.digest_value()).into_bytes()
    }
}
