//! Random-access views over component files, frozen at a length.
//!
//! A [`SegmentedFile`] is the reader-side handle to a data or index file:
//! it owns an open file handle (valid across the commit rename) and bounds
//! every read by a logical length, which for early-open readers is a
//! readable boundary rather than the file's physical size. Compressed data
//! files resolve logical offsets through their chunk map.
//!
//! The [`SegmentedFileBuilder`] accumulates candidate segment boundaries as
//! the writer appends; its snapshot is persisted with the summary so a
//! reopened table can rebuild the same view layout without rescanning the
//! index.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::io::compression::CompressionInfo;

/// Accumulates candidate segment boundary offsets during a build.
#[derive(Debug, Default, Clone)]
pub struct SegmentedFileBuilder {
    boundaries: Vec<u64>,
}

impl SegmentedFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an offset at which a reader view may be segmented; offsets
    /// arrive in non-decreasing order.
    pub fn add_potential_boundary(&mut self, offset: u64) {
        if self.boundaries.last() != Some(&offset) {
            self.boundaries.push(offset);
        }
    }

    /// Drops boundaries past a rewind point.
    pub fn truncate_to(&mut self, offset: u64) {
        let end = self.boundaries.partition_point(|&b| b <= offset);
        self.boundaries.truncate(end);
    }

    /// Boundaries no greater than `length`, for persistence with the
    /// summary.
    pub fn snapshot(&self, length: u64) -> Vec<u64> {
        let end = self.boundaries.partition_point(|&b| b <= length);
        self.boundaries[..end].to_vec()
    }

    /// An uncompressed view over `path`, frozen at `length` logical bytes.
    pub fn build(&self, path: &Path, length: u64) -> Result<SegmentedFile> {
        SegmentedFile::open(path, length, None)
    }

    /// A compressed view; the chunk map bounds the logical length.
    pub fn build_compressed(&self, path: &Path, info: CompressionInfo) -> Result<SegmentedFile> {
        SegmentedFile::open(path, info.data_length, Some(info))
    }
}

/// A frozen random-access view over one component file.
pub struct SegmentedFile {
    path: PathBuf,
    file: File,
    length: u64,
    compression: Option<CompressionInfo>,
}

impl SegmentedFile {
    fn open(path: &Path, length: u64, compression: Option<CompressionInfo>) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::read(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            length,
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical length of the view; reads past it fail even if the physical
    /// file has grown since.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Reads exactly `len` logical bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.length {
            return Err(Error::Read {
                path: self.path.clone(),
                cause: format!(
                    "read of {len} bytes at {offset} beyond view length {}",
                    self.length
                ),
            });
        }
        match &self.compression {
            None => self.read_raw(offset, len),
            Some(info) => self.read_compressed(info, offset, len),
        }
    }

    /// Reads from `offset` to the end of the view.
    pub fn read_to_end(&self, offset: u64) -> Result<Vec<u8>> {
        self.read_at(offset, (self.length - offset) as usize)
    }

    fn read_raw(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut reader = self.file.try_clone().map_err(|e| Error::read(&self.path, e))?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::read(&self.path, e))?;
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::read(&self.path, e))?;
        Ok(buf)
    }

    fn read_compressed(&self, info: &CompressionInfo, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file_length = self
            .file
            .metadata()
            .map_err(|e| Error::read(&self.path, e))?
            .len();

        let mut out = Vec::with_capacity(len);
        let mut logical = offset;
        let end = offset + len as u64;
        while logical < end {
            let (index, chunk_offset, chunk_len) = info.chunk_for(logical, file_length)?;
            let framed = self.read_raw(chunk_offset, chunk_len as usize)?;
            let chunk = info.open_chunk(&framed)?;

            let chunk_start = index as u64 * info.chunk_size as u64;
            let from = (logical - chunk_start) as usize;
            let to = chunk.len().min((end - chunk_start) as usize);
            out.extend_from_slice(&chunk[from..to]);
            logical = chunk_start + to as u64;
        }
        Ok(out)
    }
}
