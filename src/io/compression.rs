//! Chunked compression for the data file and its `CompressionInfo` sidecar.
//!
//! A compressed data file is a sequence of chunks, each holding one
//! `chunk_size` slice of the logical stream:
//!
//! ```text
//! +-------------------+-----------+-------------------+-----------+-----
//! | compressed bytes  | crc32:u32 | compressed bytes  | crc32:u32 | ...
//! +-------------------+-----------+-------------------+-----------+-----
//! ```
//!
//! Every chunk covers exactly `chunk_size` logical bytes except the last,
//! so a logical offset maps to a chunk by division. The sidecar records the
//! codec, chunk size, total logical length, and the on-disk offset of each
//! chunk; chunk lengths are derived from neighboring offsets.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::io::checksum::crc32;

/// Chunk codec. Snappy is the only codec currently wired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Snappy,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Snappy => "snappy",
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        match name {
            "snappy" => Ok(Codec::Snappy),
            other => Err(Error::InvalidData(format!("unknown codec {other:?}"))),
        }
    }

    pub fn compress(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Snappy => {
                let mut out = vec![0u8; snap::raw::max_compress_len(chunk.len())];
                let n = snap::raw::Encoder::new()
                    .compress(chunk, &mut out)
                    .map_err(|e| Error::InvalidData(format!("snappy compression: {e}")))?;
                out.truncate(n);
                Ok(out)
            }
        }
    }

    pub fn decompress(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Snappy => snap::raw::Decoder::new()
                .decompress_vec(chunk)
                .map_err(|e| Error::InvalidData(format!("snappy decompression: {e}"))),
        }
    }
}

/// Running chunk bookkeeping while the compressed sink is open. Turned into
/// a [`CompressionInfo`] at prepare.
pub struct CompressedChunks {
    codec: Codec,
    chunk_size: usize,
    /// On-disk offset of each chunk start.
    chunk_offsets: Vec<u64>,
}

impl CompressedChunks {
    pub fn new(codec: Codec, chunk_size: usize) -> Self {
        Self {
            codec,
            chunk_size,
            chunk_offsets: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_offsets.len()
    }

    /// Compresses one logical chunk and frames it with its CRC. The caller
    /// writes the returned bytes at `on_disk_offset`.
    pub fn seal_chunk(&mut self, chunk: &[u8], on_disk_offset: u64) -> Result<Vec<u8>> {
        let mut framed = self.codec.compress(chunk)?;
        let crc = crc32(&framed);
        framed.write_u32::<BigEndian>(crc).unwrap();
        self.chunk_offsets.push(on_disk_offset);
        Ok(framed)
    }

    /// Drops chunks past a rewind point.
    pub fn truncate_chunks(&mut self, chunk_count: usize) {
        self.chunk_offsets.truncate(chunk_count);
    }

    /// The sidecar view of the chunks written so far, bounded to
    /// `data_length` logical bytes.
    pub fn info(&self, data_length: u64) -> CompressionInfo {
        let chunk_count = if data_length == 0 {
            0
        } else {
            ((data_length - 1) / self.chunk_size as u64 + 1) as usize
        };
        CompressionInfo {
            codec: self.codec,
            chunk_size: self.chunk_size as u32,
            data_length,
            chunk_offsets: self.chunk_offsets[..chunk_count.min(self.chunk_offsets.len())].to_vec(),
        }
    }
}

/// The `CompressionInfo` component: everything a reader needs to map
/// logical offsets onto compressed chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionInfo {
    pub codec: Codec,
    pub chunk_size: u32,
    /// Total logical (uncompressed) length of the data stream.
    pub data_length: u64,
    pub chunk_offsets: Vec<u64>,
}

impl CompressionInfo {
    /// Chunk index and on-disk extent `(offset, length)` for a logical
    /// offset. `file_length` bounds the final chunk.
    pub fn chunk_for(&self, logical_offset: u64, file_length: u64) -> Result<(usize, u64, u64)> {
        if logical_offset >= self.data_length {
            return Err(Error::InvalidData(format!(
                "offset {logical_offset} beyond data length {}",
                self.data_length
            )));
        }
        let index = (logical_offset / self.chunk_size as u64) as usize;
        let start = self.chunk_offsets[index];
        let end = self
            .chunk_offsets
            .get(index + 1)
            .copied()
            .unwrap_or(file_length);
        Ok((index, start, end - start))
    }

    /// Decompresses the framed chunk read from disk, verifying its CRC.
    pub fn open_chunk(&self, framed: &[u8]) -> Result<Vec<u8>> {
        if framed.len() < 4 {
            return Err(Error::InvalidData("truncated compressed chunk".to_string()));
        }
        let (body, crc_bytes) = framed.split_at(framed.len() - 4);
        let stored = u32::from_be_bytes(crc_bytes.try_into().unwrap());
        if crc32(body) != stored {
            return Err(Error::InvalidData(
                "compressed chunk checksum mismatch".to_string(),
            ));
        }
        self.codec.decompress(body)
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let name = self.codec.name().as_bytes();
        buf.write_u16::<BigEndian>(name.len() as u16).unwrap();
        buf.extend_from_slice(name);
        buf.write_u32::<BigEndian>(self.chunk_size).unwrap();
        buf.write_u64::<BigEndian>(self.data_length).unwrap();
        buf.write_u32::<BigEndian>(self.chunk_offsets.len() as u32)
            .unwrap();
        for offset in &self.chunk_offsets {
            buf.write_u64::<BigEndian>(*offset).unwrap();
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let name_len = cursor.read_u16::<BigEndian>()? as usize;
        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        let codec = Codec::from_name(
            std::str::from_utf8(&name)
                .map_err(|e| Error::InvalidData(format!("codec name: {e}")))?,
        )?;

        let chunk_size = cursor.read_u32::<BigEndian>()?;
        let data_length = cursor.read_u64::<BigEndian>()?;
        let chunk_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut chunk_offsets = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_offsets.push(cursor.read_u64::<BigEndian>()?);
        }

        Ok(Self {
            codec,
            chunk_size,
            data_length,
            chunk_offsets,
        })
    }
}
