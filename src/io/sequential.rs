//! Append-only buffered file sink with rewind and a two-phase commit
//! lifecycle.
//!
//! Every component file of an SSTable build is written through a
//! [`SequentialWriter`]. The sink creates its file under a temporary name,
//! buffers appends, and exposes an explicit prepare/commit/abort protocol:
//! `prepare_to_commit` flushes the tail and finalizes checksum sidecars,
//! `commit` renames the temp file into place and fsyncs the parent
//! directory, `abort` unlinks everything. A write fault poisons the sink;
//! every later operation except `abort` replays the stored error.
//!
//! Three flavors share the one type:
//! - plain (primary index): no sidecars;
//! - checksummed (uncompressed data): per-chunk `Crc` side file plus a
//!   `Digest` file;
//! - compressed (compressed data): snappy chunks with embedded CRCs and a
//!   `CompressionInfo` sidecar. The buffer is one logical chunk, and only
//!   whole chunks are ever on disk before `prepare`, so the durable frontier
//!   reported to the post-flush observer always sits on a chunk boundary.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::CompressionParams;
use crate::error::{Error, Result};
use crate::io::checksum::{ChecksumMark, ChunkChecksum};
use crate::io::compression::{CompressedChunks, CompressionInfo};
use crate::io::tmp_path;

/// Lifecycle states; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Open,
    Prepared,
    Committed,
    Aborted,
}

/// Observer invoked with the last durable logical offset after each fsync.
pub type PostFlushListener = Box<dyn FnMut(u64) + Send>;

struct CrcSidecar {
    checksum: ChunkChecksum,
    crc_path: PathBuf,
    digest_path: Option<PathBuf>,
}

struct CompressedSidecar {
    digest: ChunkChecksum,
    chunks: CompressedChunks,
    info_path: PathBuf,
    digest_path: Option<PathBuf>,
}

enum Payload {
    Plain(Option<CrcSidecar>),
    Compressed(CompressedSidecar),
}

/// A rewind point captured by [`SequentialWriter::mark`].
pub struct FileMark {
    logical: u64,
    flushed: u64,
    on_disk: u64,
    chunk_count: usize,
    /// Buffered-but-unflushed bytes at the mark; replayed on rewind for
    /// compressed sinks, where flushed chunks cannot be reopened.
    buffered: Vec<u8>,
    checksum: Option<ChecksumMark>,
}

impl FileMark {
    pub fn position(&self) -> u64 {
        self.logical
    }
}

pub struct SequentialWriter {
    final_path: PathBuf,
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    capacity: usize,
    /// Logical bytes handed to the OS.
    flushed: u64,
    /// Physical bytes written; equals `flushed` for uncompressed sinks.
    on_disk: u64,
    /// Logical offset guaranteed durable by the last fsync.
    last_synced: u64,
    payload: Payload,
    post_flush: Option<PostFlushListener>,
    state: SinkState,
    poison: Option<Error>,
    /// Set once the final (possibly short) chunk is flushed; no appends or
    /// rewinds afterwards.
    tail_sealed: bool,
}

impl SequentialWriter {
    /// Opens a plain sink with no checksum sidecars (the primary index).
    pub fn open(path: impl Into<PathBuf>, buffer_size: usize) -> Result<Self> {
        Self::create(path.into(), buffer_size, Payload::Plain(None))
    }

    /// Opens an uncompressed data sink accompanied by a `Crc` side file and
    /// optionally a `Digest` file. The checksum chunk size equals the
    /// buffer size.
    pub fn open_checksummed(
        path: impl Into<PathBuf>,
        crc_path: impl Into<PathBuf>,
        digest_path: Option<PathBuf>,
        buffer_size: usize,
    ) -> Result<Self> {
        let sidecar = CrcSidecar {
            checksum: ChunkChecksum::with_chunks(buffer_size),
            crc_path: crc_path.into(),
            digest_path,
        };
        Self::create(path.into(), buffer_size, Payload::Plain(Some(sidecar)))
    }

    /// Opens a compressed data sink; the buffer holds exactly one logical
    /// chunk, sealed and written when full.
    pub fn open_compressed(
        path: impl Into<PathBuf>,
        info_path: impl Into<PathBuf>,
        digest_path: Option<PathBuf>,
        params: &CompressionParams,
    ) -> Result<Self> {
        let sidecar = CompressedSidecar {
            digest: ChunkChecksum::digest_only(),
            chunks: CompressedChunks::new(params.codec, params.chunk_size),
            info_path: info_path.into(),
            digest_path,
        };
        Self::create(
            path.into(),
            params.chunk_size,
            Payload::Compressed(sidecar),
        )
    }

    fn create(final_path: PathBuf, capacity: usize, payload: Payload) -> Result<Self> {
        assert!(capacity > 0, "buffer capacity must be non-zero");
        let path = tmp_path(&final_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::write(&path, e))?;

        Ok(Self {
            final_path,
            path,
            file,
            buffer: Vec::with_capacity(capacity),
            capacity,
            flushed: 0,
            on_disk: 0,
            last_synced: 0,
            payload,
            post_flush: None,
            state: SinkState::Open,
            poison: None,
            tail_sealed: false,
        })
    }

    /// The final (post-commit) path of this file.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// The path currently on disk: the temp name until commit.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical (uncompressed) offset of the next write.
    pub fn file_pointer(&self) -> u64 {
        self.flushed + self.buffer.len() as u64
    }

    /// Physical on-disk position; differs from the logical pointer under
    /// compression.
    pub fn on_disk_file_pointer(&self) -> u64 {
        match self.payload {
            Payload::Plain(_) => self.file_pointer(),
            Payload::Compressed(_) => self.on_disk,
        }
    }

    /// Logical offset guaranteed durable by the last `sync`.
    pub fn last_synced_offset(&self) -> u64 {
        self.last_synced
    }

    /// Whether `commit` has renamed this file into place.
    pub fn is_committed(&self) -> bool {
        self.state == SinkState::Committed
    }

    pub fn set_post_flush_listener(&mut self, listener: PostFlushListener) {
        self.post_flush = Some(listener);
    }

    /// Compression bookkeeping for the bytes written so far, if this is a
    /// compressed sink. `data_length` bounds the logical view (a readable
    /// boundary, or the full pointer at finalize).
    pub fn compression_info(&self, data_length: u64) -> Option<CompressionInfo> {
        match &self.payload {
            Payload::Plain(_) => None,
            Payload::Compressed(sidecar) => Some(sidecar.chunks.info(data_length)),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if let Some(err) = &self.poison {
            return Err(err.clone());
        }
        if self.state != SinkState::Open {
            return Err(Error::InvalidState(format!(
                "sink for {} is {:?}",
                self.final_path.display(),
                self.state
            )));
        }
        if self.tail_sealed {
            return Err(Error::InvalidState(format!(
                "sink for {} already flushed its final chunk",
                self.final_path.display()
            )));
        }
        Ok(())
    }

    fn poisoning(&mut self, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            self.poison = Some(err.clone());
        }
        result
    }

    /// Appends bytes; never partial. A fault poisons the sink.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_writable()?;

        match &mut self.payload {
            Payload::Plain(Some(sidecar)) => sidecar.checksum.update(bytes),
            Payload::Compressed(sidecar) => sidecar.digest.update(bytes),
            Payload::Plain(None) => {}
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            // Large plain writes skip the buffer once it is empty.
            if self.buffer.is_empty()
                && rest.len() >= self.capacity
                && matches!(self.payload, Payload::Plain(_))
            {
                let write = self
                    .file
                    .write_all(rest)
                    .map_err(|e| Error::write(&self.path, e));
                self.poisoning(write)?;
                self.flushed += rest.len() as u64;
                self.on_disk = self.flushed;
                break;
            }

            let space = self.capacity - self.buffer.len();
            let take = space.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buffer.len() == self.capacity {
                let flush = self.flush_buffer();
                self.poisoning(flush)?;
            }
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match &mut self.payload {
            Payload::Plain(_) => {
                self.file
                    .write_all(&self.buffer)
                    .map_err(|e| Error::write(&self.path, e))?;
                self.flushed += self.buffer.len() as u64;
                self.on_disk = self.flushed;
            }
            Payload::Compressed(sidecar) => {
                let framed = sidecar.chunks.seal_chunk(&self.buffer, self.on_disk)?;
                self.file
                    .write_all(&framed)
                    .map_err(|e| Error::write(&self.path, e))?;
                self.flushed += self.buffer.len() as u64;
                self.on_disk += framed.len() as u64;
            }
        }
        self.buffer.clear();
        Ok(())
    }

    /// Captures the current logical position for a later
    /// [`reset_and_truncate`](Self::reset_and_truncate).
    pub fn mark(&mut self) -> Result<FileMark> {
        self.ensure_writable()?;
        let checksum = match &self.payload {
            Payload::Plain(Some(sidecar)) => Some(sidecar.checksum.mark()),
            Payload::Compressed(sidecar) => Some(sidecar.digest.mark()),
            Payload::Plain(None) => None,
        };
        let chunk_count = match &self.payload {
            Payload::Compressed(sidecar) => sidecar.chunks.chunk_count(),
            Payload::Plain(_) => 0,
        };
        let buffered = match self.payload {
            // Flushed compressed chunks cannot be re-opened on rewind, so
            // the partial chunk is snapshotted here.
            Payload::Compressed(_) => self.buffer.clone(),
            Payload::Plain(_) => Vec::new(),
        };
        Ok(FileMark {
            logical: self.file_pointer(),
            flushed: self.flushed,
            on_disk: self.on_disk,
            chunk_count,
            buffered,
            checksum,
        })
    }

    /// Discards every byte written after the mark and truncates the
    /// physical file to match.
    pub fn reset_and_truncate(&mut self, mark: &FileMark) -> Result<()> {
        self.ensure_writable()?;

        let result = self.rewind(mark);
        self.poisoning(result)
    }

    fn rewind(&mut self, mark: &FileMark) -> Result<()> {
        match &mut self.payload {
            Payload::Plain(sidecar) => {
                if let (Some(sidecar), Some(checksum_mark)) = (sidecar, &mark.checksum) {
                    sidecar.checksum.reset_to_mark(checksum_mark);
                }
                if self.flushed <= mark.logical {
                    // Everything past the mark is still buffered.
                    self.buffer.truncate((mark.logical - self.flushed) as usize);
                } else {
                    self.buffer.clear();
                    self.file
                        .set_len(mark.logical)
                        .map_err(|e| Error::write(&self.path, e))?;
                    self.file
                        .seek(SeekFrom::Start(mark.logical))
                        .map_err(|e| Error::write(&self.path, e))?;
                    self.flushed = mark.logical;
                    self.on_disk = mark.logical;
                }
            }
            Payload::Compressed(sidecar) => {
                if let Some(checksum_mark) = &mark.checksum {
                    sidecar.digest.reset_to_mark(checksum_mark);
                }
                sidecar.chunks.truncate_chunks(mark.chunk_count);
                self.file
                    .set_len(mark.on_disk)
                    .map_err(|e| Error::write(&self.path, e))?;
                self.file
                    .seek(SeekFrom::Start(mark.on_disk))
                    .map_err(|e| Error::write(&self.path, e))?;
                self.buffer.clear();
                self.buffer.extend_from_slice(&mark.buffered);
                self.flushed = mark.flushed;
                self.on_disk = mark.on_disk;
            }
        }
        self.last_synced = self.last_synced.min(mark.logical);
        Ok(())
    }

    /// Forces buffered data to the OS and fsyncs, then notifies the
    /// post-flush observer with the durable logical offset. Compressed
    /// sinks hold back their partial tail chunk, so the reported offset
    /// stays on a chunk boundary.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(err) = &self.poison {
            return Err(err.clone());
        }
        if matches!(self.state, SinkState::Committed | SinkState::Aborted) {
            return Err(Error::InvalidState(format!(
                "sync on {:?} sink for {}",
                self.state,
                self.final_path.display()
            )));
        }

        if matches!(self.payload, Payload::Plain(_)) {
            let flush = self.flush_buffer();
            self.poisoning(flush)?;
        }
        let sync = self
            .file
            .sync_all()
            .map_err(|e| Error::write(&self.path, e));
        self.poisoning(sync)?;

        self.last_synced = self.flushed;
        if let Some(listener) = &mut self.post_flush {
            listener(self.last_synced);
        }
        Ok(())
    }

    /// Flushes the tail, including a final short compression chunk, and
    /// fsyncs. Appends are rejected afterwards. Used to expose the complete
    /// logical contents before commit.
    pub fn flush_tail_and_sync(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let flush = self.flush_buffer();
        self.poisoning(flush)?;
        self.tail_sealed = true;
        self.sync()
    }

    /// First commit phase: flush the tail, finalize checksum side files
    /// (temp-named), and fsync everything. Idempotent once prepared or
    /// committed; invalid after abort.
    pub fn prepare_to_commit(&mut self) -> Result<()> {
        match self.state {
            SinkState::Prepared | SinkState::Committed => return Ok(()),
            SinkState::Aborted => {
                return Err(Error::InvalidState(format!(
                    "prepare on aborted sink for {}",
                    self.final_path.display()
                )))
            }
            SinkState::Open => {}
        }
        if let Some(err) = &self.poison {
            return Err(err.clone());
        }

        let result = self.do_prepare();
        self.poisoning(result)?;
        self.state = SinkState::Prepared;
        Ok(())
    }

    fn do_prepare(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.tail_sealed = true;

        // The file is exactly its logical/physical length at this point;
        // the truncate guards against a rewound file that was never
        // re-extended.
        let physical = match self.payload {
            Payload::Plain(_) => self.flushed,
            Payload::Compressed(_) => self.on_disk,
        };
        self.file
            .set_len(physical)
            .map_err(|e| Error::write(&self.path, e))?;

        match &self.payload {
            Payload::Plain(None) => {}
            Payload::Plain(Some(sidecar)) => {
                write_sidecar(&sidecar.crc_path, &sidecar.checksum.encode_crc_file())?;
                if let Some(digest_path) = &sidecar.digest_path {
                    write_sidecar(digest_path, &sidecar.checksum.encode_digest_file())?;
                }
            }
            Payload::Compressed(sidecar) => {
                let info = sidecar.chunks.info(self.flushed);
                let mut encoded = Vec::new();
                info.encode_into(&mut encoded);
                write_sidecar(&sidecar.info_path, &encoded)?;
                if let Some(digest_path) = &sidecar.digest_path {
                    write_sidecar(digest_path, &sidecar.digest.encode_digest_file())?;
                }
            }
        }

        self.file
            .sync_all()
            .map_err(|e| Error::write(&self.path, e))?;
        self.last_synced = self.flushed;
        Ok(())
    }

    /// Second commit phase: renames the temp files to their final names and
    /// fsyncs the parent directory. Idempotent once committed.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            SinkState::Committed => return Ok(()),
            SinkState::Prepared => {}
            state => {
                return Err(Error::InvalidState(format!(
                    "commit on {:?} sink for {}",
                    state,
                    self.final_path.display()
                )))
            }
        }

        fs::rename(&self.path, &self.final_path).map_err(|e| Error::write(&self.final_path, e))?;
        for (tmp, fin) in self.sidecar_paths() {
            fs::rename(&tmp, &fin).map_err(|e| Error::write(&fin, e))?;
        }
        sync_parent_dir(&self.final_path)?;

        self.state = SinkState::Committed;
        Ok(())
    }

    /// Closes and unlinks the temp files. Valid from any pre-commit state,
    /// poisoned or not; idempotent.
    pub fn abort(&mut self) -> Result<()> {
        match self.state {
            SinkState::Committed => {
                return Err(Error::InvalidState(format!(
                    "abort on committed sink for {}",
                    self.final_path.display()
                )))
            }
            SinkState::Aborted => return Ok(()),
            _ => {}
        }
        self.state = SinkState::Aborted;
        self.buffer.clear();

        let mut acc = Error::accumulate(None, remove_quiet(&self.path));
        for (tmp, _) in self.sidecar_paths() {
            acc = Error::accumulate(acc, remove_quiet(&tmp));
        }
        match acc {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn sidecar_paths(&self) -> Vec<(PathBuf, PathBuf)> {
        let (first, digest) = match &self.payload {
            Payload::Plain(None) => return Vec::new(),
            Payload::Plain(Some(sidecar)) => (&sidecar.crc_path, &sidecar.digest_path),
            Payload::Compressed(sidecar) => (&sidecar.info_path, &sidecar.digest_path),
        };
        let mut paths = vec![(tmp_path(first), first.clone())];
        if let Some(digest_path) = digest {
            paths.push((tmp_path(digest_path), digest_path.clone()));
        }
        paths
    }
}

/// Writes a complete component file under its temp name and fsyncs it.
pub(crate) fn write_sidecar(final_path: &Path, bytes: &[u8]) -> Result<()> {
    let path = tmp_path(final_path);
    let mut file = File::create(&path).map_err(|e| Error::write(&path, e))?;
    file.write_all(bytes).map_err(|e| Error::write(&path, e))?;
    file.sync_all().map_err(|e| Error::write(&path, e))?;
    Ok(())
}

/// Fsyncs the directory containing `path` so renames survive a crash.
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };
    let dir = File::open(parent).map_err(|e| Error::write(parent, e))?;
    dir.sync_all().map_err(|e| Error::write(parent, e))
}

fn remove_quiet(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
            Err(Error::write(path, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compression::Codec;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_file(path: &Path) -> Vec<u8> {
        let mut buf = Vec::new();
        File::open(path).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_write_buffers_until_capacity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 16).unwrap();

        sink.write(b"hello").unwrap();
        assert_eq!(sink.file_pointer(), 5);
        // Nothing flushed yet.
        assert_eq!(read_file(sink.path()).len(), 0);

        sink.write(&[0u8; 16]).unwrap();
        assert_eq!(sink.file_pointer(), 21);
        assert!(read_file(sink.path()).len() >= 16);
    }

    #[test]
    fn test_commit_renames_and_removes_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 16).unwrap();
        sink.write(b"payload").unwrap();

        sink.prepare_to_commit().unwrap();
        assert!(!path.exists());
        sink.commit().unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
        assert_eq!(read_file(&path), b"payload");
    }

    #[test]
    fn test_prepare_and_commit_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 16).unwrap();
        sink.write(b"x").unwrap();

        sink.prepare_to_commit().unwrap();
        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();
        sink.commit().unwrap();
        sink.prepare_to_commit().unwrap();
    }

    #[test]
    fn test_abort_unlinks_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 16).unwrap();
        sink.write(b"doomed").unwrap();

        sink.abort().unwrap();
        assert!(!path.exists());
        assert!(!tmp_path(&path).exists());

        assert!(sink.write(b"more").is_err());
        assert!(sink.prepare_to_commit().is_err());
    }

    #[test]
    fn test_mark_and_reset_discards_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        // Small buffer so the discarded bytes span a flush.
        let mut sink = SequentialWriter::open(&path, 8).unwrap();

        sink.write(b"keep").unwrap();
        let mark = sink.mark().unwrap();
        sink.write(b"discard these many bytes").unwrap();
        sink.reset_and_truncate(&mark).unwrap();
        sink.write(b"-tail").unwrap();

        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();
        assert_eq!(read_file(&path), b"keep-tail");
    }

    #[test]
    fn test_reset_within_buffer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 1024).unwrap();

        sink.write(b"keep").unwrap();
        let mark = sink.mark().unwrap();
        sink.write(b"drop").unwrap();
        sink.reset_and_truncate(&mark).unwrap();
        assert_eq!(sink.file_pointer(), 4);

        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();
        assert_eq!(read_file(&path), b"keep");
    }

    #[test]
    fn test_sync_notifies_listener() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 1024).unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let observer = seen.clone();
        sink.set_post_flush_listener(Box::new(move |offset| {
            observer.store(offset, Ordering::SeqCst);
        }));

        sink.write(b"0123456789").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        sink.sync().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_checksummed_sink_writes_crc_and_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let crc_path = dir.path().join("data.crc");
        let digest_path = dir.path().join("data.digest");

        let mut sink =
            SequentialWriter::open_checksummed(&path, &crc_path, Some(digest_path.clone()), 16)
                .unwrap();
        sink.write(&[0xAB; 40]).unwrap();
        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();

        // chunk size header + two full chunks + one partial
        assert_eq!(read_file(&crc_path).len(), 4 + 3 * 4);
        let digest = String::from_utf8(read_file(&digest_path)).unwrap();
        let expected = crate::io::checksum::crc32(&[0xAB; 40]);
        assert_eq!(digest.trim().parse::<u32>().unwrap(), expected);
    }

    #[test]
    fn test_compressed_sink_defers_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let params = CompressionParams {
            chunk_size: 64,
            codec: Codec::Snappy,
        };
        let mut sink = SequentialWriter::open_compressed(
            &path,
            dir.path().join("info.db"),
            None,
            &params,
        )
        .unwrap();

        // One full chunk plus a partial tail.
        sink.write(&[1u8; 100]).unwrap();
        sink.sync().unwrap();
        // Only the full chunk is durable.
        assert_eq!(sink.last_synced_offset(), 64);

        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();

        let info = sink.compression_info(100).unwrap();
        assert_eq!(info.chunk_offsets.len(), 2);
        assert_eq!(info.data_length, 100);
    }

    #[test]
    fn test_compressed_roundtrip_via_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let params = CompressionParams {
            chunk_size: 32,
            codec: Codec::Snappy,
        };
        let mut sink = SequentialWriter::open_compressed(
            &path,
            dir.path().join("info.db"),
            None,
            &params,
        )
        .unwrap();

        let payload: Vec<u8> = (0..100u8).collect();
        sink.write(&payload).unwrap();
        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();

        let info = sink.compression_info(100).unwrap();
        let file_bytes = read_file(&path);
        let mut recovered = Vec::new();
        for (i, &start) in info.chunk_offsets.iter().enumerate() {
            let end = info
                .chunk_offsets
                .get(i + 1)
                .copied()
                .unwrap_or(file_bytes.len() as u64);
            recovered.extend(
                info.open_chunk(&file_bytes[start as usize..end as usize])
                    .unwrap(),
            );
        }
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_compressed_mark_reset_restores_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let params = CompressionParams {
            chunk_size: 32,
            codec: Codec::Snappy,
        };
        let mut sink = SequentialWriter::open_compressed(
            &path,
            dir.path().join("info.db"),
            None,
            &params,
        )
        .unwrap();

        sink.write(&[1u8; 40]).unwrap(); // one chunk + 8 buffered
        let mark = sink.mark().unwrap();
        sink.write(&[2u8; 100]).unwrap();
        sink.reset_and_truncate(&mark).unwrap();
        assert_eq!(sink.file_pointer(), 40);
        sink.write(&[3u8; 10]).unwrap();

        sink.prepare_to_commit().unwrap();
        sink.commit().unwrap();

        let info = sink.compression_info(50).unwrap();
        let file_bytes = read_file(&path);
        let mut recovered = Vec::new();
        for (i, &start) in info.chunk_offsets.iter().enumerate() {
            let end = info
                .chunk_offsets
                .get(i + 1)
                .copied()
                .unwrap_or(file_bytes.len() as u64);
            recovered.extend(
                info.open_chunk(&file_bytes[start as usize..end as usize])
                    .unwrap(),
            );
        }
        let mut expected = vec![1u8; 40];
        expected.extend_from_slice(&[3u8; 10]);
        assert_eq!(recovered, expected);
    }

    #[test]
    fn test_write_after_final_flush_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.db");
        let mut sink = SequentialWriter::open(&path, 16).unwrap();
        sink.write(b"tail").unwrap();
        sink.flush_tail_and_sync().unwrap();
        assert!(sink.write(b"more").is_err());
        sink.abort().unwrap();
    }
}
