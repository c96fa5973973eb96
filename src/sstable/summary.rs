//! Sampled index summary and the durable readable boundary.
//!
//! The builder samples every `min_index_interval`-th partition into a
//! sparse `(key, index offset)` list, and alongside each sample records
//! where that partition's bytes end in the index and data files. Sink
//! observers report fsync progress into a shared [`SyncedOffsets`]; the
//! largest sample whose end offsets are both durable is the **readable
//! boundary**, the frontier up to which an early-open reader may safely
//! serve.
//!
//! # Summary File Format
//!
//! ```text
//! +--------------------------------------------------------------+
//! | samplingLevel:u32 | minIndexInterval:u32 | fullLevel:u32     |
//! | entryCount:u32                                               |
//! +--------------------------------------------------------------+
//! | offsets table: entryCount x indexOffset:u64                  |
//! +--------------------------------------------------------------+
//! | packed keys: entryCount x (len:u16, bytes)                   |
//! +--------------------------------------------------------------+
//! | first key (len:u16, bytes) | last key (len:u16, bytes)       |
//! +--------------------------------------------------------------+
//! | segmented builder snapshots: index then data                 |
//! |   (count:u32, count x offset:u64) each                       |
//! +--------------------------------------------------------------+
//! ```

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::key::{DecoratedKey, Partitioner};

/// Durable offsets of the index and data files, advanced by the sinks'
/// post-flush observers. Shared between the summary builder and the sink
/// callbacks.
#[derive(Debug, Default)]
pub struct SyncedOffsets {
    index: AtomicU64,
    data: AtomicU64,
}

impl SyncedOffsets {
    pub fn mark_index_synced(&self, offset: u64) {
        self.index.fetch_max(offset, Ordering::SeqCst);
    }

    pub fn mark_data_synced(&self, offset: u64) {
        self.data.fetch_max(offset, Ordering::SeqCst);
    }

    pub fn index_synced(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn data_synced(&self) -> u64 {
        self.data.load(Ordering::SeqCst)
    }
}

/// The largest prefix of appended partitions durable in both files.
#[derive(Debug, Clone)]
pub struct ReadableBoundary {
    pub last_key: DecoratedKey,
    pub index_length: u64,
    pub data_length: u64,
    /// Number of summary samples fully inside the boundary.
    pub summary_count: usize,
}

/// Counters snapshot for `mark`/`reset`, keeping sampling deterministic
/// across a rewind.
#[derive(Debug, Clone, Copy)]
pub struct SummaryMark {
    keys_seen: u64,
    samples: usize,
}

pub struct IndexSummaryBuilder {
    min_index_interval: usize,
    base_sampling_level: usize,
    entries: Vec<(DecoratedKey, u64)>,
    /// Per sample: `(index_end, data_end)` of the sampled partition, used
    /// for boundary computation. Parallel to `entries`.
    end_offsets: Vec<(u64, u64)>,
    keys_seen: u64,
    synced: Arc<SyncedOffsets>,
}

impl IndexSummaryBuilder {
    pub fn new(expected_keys: u64, min_index_interval: usize, base_sampling_level: usize) -> Self {
        assert!(min_index_interval > 0, "index interval must be non-zero");
        let expected_samples = (expected_keys as usize / min_index_interval).saturating_add(1);
        Self {
            min_index_interval,
            base_sampling_level,
            entries: Vec::with_capacity(expected_samples),
            end_offsets: Vec::with_capacity(expected_samples),
            keys_seen: 0,
            synced: Arc::new(SyncedOffsets::default()),
        }
    }

    /// The shared offsets the sink observers write into.
    pub fn synced_offsets(&self) -> Arc<SyncedOffsets> {
        Arc::clone(&self.synced)
    }

    /// Records a partition if it falls on the sampling stride.
    pub fn maybe_add_entry(
        &mut self,
        key: &DecoratedKey,
        index_start: u64,
        index_end: u64,
        data_end: u64,
    ) {
        if self.keys_seen % self.min_index_interval as u64 == 0 {
            self.entries.push((key.clone(), index_start));
            self.end_offsets.push((index_end, data_end));
        }
        self.keys_seen += 1;
    }

    /// The boundary induced by the current durable offsets, if any sample
    /// is fully covered. Tolerates the index and data observers firing in
    /// any interleaving: a sample counts only once both files have caught
    /// up.
    pub fn last_readable_boundary(&self) -> Option<ReadableBoundary> {
        let index_synced = self.synced.index_synced();
        let data_synced = self.synced.data_synced();

        // Both end-offset sequences are non-decreasing, so the covered
        // prefix is the meet of two partition points.
        let by_index = self.end_offsets.partition_point(|&(i, _)| i <= index_synced);
        let by_data = self.end_offsets.partition_point(|&(_, d)| d <= data_synced);
        let covered = by_index.min(by_data);
        if covered == 0 {
            return None;
        }

        let (index_length, data_length) = self.end_offsets[covered - 1];
        Some(ReadableBoundary {
            last_key: self.entries[covered - 1].0.clone(),
            index_length,
            data_length,
            summary_count: covered,
        })
    }

    /// Snapshots the running counters for a later
    /// [`reset_to_mark`](Self::reset_to_mark).
    pub fn mark(&self) -> SummaryMark {
        SummaryMark {
            keys_seen: self.keys_seen,
            samples: self.entries.len(),
        }
    }

    /// Drops samples taken after the mark and restores the partition
    /// counter, so re-appended partitions sample exactly as before.
    pub fn reset_to_mark(&mut self, mark: SummaryMark) {
        self.entries.truncate(mark.samples);
        self.end_offsets.truncate(mark.samples);
        self.keys_seen = mark.keys_seen;
    }

    /// Builds the summary over the full accumulated set, or over the
    /// prefix inside `boundary` for an early open.
    pub fn build(&self, boundary: Option<&ReadableBoundary>) -> IndexSummary {
        let count = boundary
            .map(|b| b.summary_count)
            .unwrap_or(self.entries.len());
        IndexSummary {
            min_index_interval: self.min_index_interval,
            sampling_level: self.base_sampling_level,
            base_sampling_level: self.base_sampling_level,
            entries: self.entries[..count].to_vec(),
        }
    }
}

/// The sampled sparse index a reader binary-searches before scanning the
/// primary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    min_index_interval: usize,
    sampling_level: usize,
    base_sampling_level: usize,
    entries: Vec<(DecoratedKey, u64)>,
}

impl IndexSummary {
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(DecoratedKey, u64)] {
        &self.entries
    }

    pub fn sampling_level(&self) -> usize {
        self.sampling_level
    }

    pub fn min_index_interval(&self) -> usize {
        self.min_index_interval
    }

    /// Mean partitions per retained sample at the current level.
    pub fn effective_index_interval(&self) -> usize {
        self.min_index_interval * self.base_sampling_level / self.sampling_level
    }

    /// Index-file offset at which to start scanning for `key`: the entry
    /// of the greatest sample not after it. `None` when the key sorts
    /// before the first sample.
    pub fn search(&self, key: &DecoratedKey) -> Option<u64> {
        let idx = self.entries.partition_point(|(sample, _)| sample <= key);
        idx.checked_sub(1).map(|i| self.entries[i].1)
    }

    /// Drops samples in a deterministic round-robin pattern down to
    /// `level / base_sampling_level` of the original density.
    pub fn downsample(&self, level: usize) -> IndexSummary {
        assert!(
            level >= 1 && level <= self.base_sampling_level,
            "sampling level out of range"
        );
        if level >= self.sampling_level {
            return self.clone();
        }

        let base = self.base_sampling_level;
        let entries = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, _)| (i * level) % base < level)
            .map(|(_, e)| e.clone())
            .collect();
        IndexSummary {
            min_index_interval: self.min_index_interval,
            sampling_level: level,
            base_sampling_level: base,
            entries,
        }
    }
}

/// Everything persisted in the `Summary` component: the summary itself,
/// the table's first and last keys, and the segmented-file builder
/// snapshots needed to rebuild reader views on reopen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFile {
    pub summary: IndexSummary,
    pub first_key: Option<Vec<u8>>,
    pub last_key: Option<Vec<u8>>,
    pub index_boundaries: Vec<u64>,
    pub data_boundaries: Vec<u64>,
}

fn encode_opt_key(key: &Option<Vec<u8>>, buf: &mut Vec<u8>) {
    let bytes = key.as_deref().unwrap_or(&[]);
    buf.write_u16::<BigEndian>(bytes.len() as u16).unwrap();
    buf.extend_from_slice(bytes);
}

fn decode_opt_key(cursor: &mut Cursor<&[u8]>) -> Result<Option<Vec<u8>>> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    if len == 0 {
        return Ok(None);
    }
    let mut key = vec![0u8; len];
    cursor.read_exact(&mut key)?;
    Ok(Some(key))
}

fn encode_boundaries(boundaries: &[u64], buf: &mut Vec<u8>) {
    buf.write_u32::<BigEndian>(boundaries.len() as u32).unwrap();
    for offset in boundaries {
        buf.write_u64::<BigEndian>(*offset).unwrap();
    }
}

fn decode_boundaries(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u64>> {
    let count = cursor.read_u32::<BigEndian>()? as usize;
    let mut boundaries = Vec::with_capacity(count);
    for _ in 0..count {
        boundaries.push(cursor.read_u64::<BigEndian>()?);
    }
    Ok(boundaries)
}

impl SummaryFile {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let summary = &self.summary;
        buf.write_u32::<BigEndian>(summary.sampling_level as u32)
            .unwrap();
        buf.write_u32::<BigEndian>(summary.min_index_interval as u32)
            .unwrap();
        buf.write_u32::<BigEndian>(summary.base_sampling_level as u32)
            .unwrap();
        buf.write_u32::<BigEndian>(summary.entries.len() as u32)
            .unwrap();

        for (_, index_offset) in &summary.entries {
            buf.write_u64::<BigEndian>(*index_offset).unwrap();
        }
        for (key, _) in &summary.entries {
            buf.write_u16::<BigEndian>(key.key().len() as u16).unwrap();
            buf.extend_from_slice(key.key());
        }

        encode_opt_key(&self.first_key, buf);
        encode_opt_key(&self.last_key, buf);
        encode_boundaries(&self.index_boundaries, buf);
        encode_boundaries(&self.data_boundaries, buf);
    }

    /// Decodes a summary file; keys are re-decorated with the table's
    /// partitioner.
    pub fn decode_from(cursor: &mut Cursor<&[u8]>, partitioner: &dyn Partitioner) -> Result<Self> {
        let sampling_level = cursor.read_u32::<BigEndian>()? as usize;
        let min_index_interval = cursor.read_u32::<BigEndian>()? as usize;
        let base_sampling_level = cursor.read_u32::<BigEndian>()? as usize;
        let entry_count = cursor.read_u32::<BigEndian>()? as usize;
        if sampling_level == 0 || sampling_level > base_sampling_level {
            return Err(Error::InvalidData(format!(
                "sampling level {sampling_level} outside [1, {base_sampling_level}]"
            )));
        }

        let mut offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            offsets.push(cursor.read_u64::<BigEndian>()?);
        }
        let mut entries = Vec::with_capacity(entry_count);
        for offset in offsets {
            let len = cursor.read_u16::<BigEndian>()? as usize;
            let mut key = vec![0u8; len];
            cursor.read_exact(&mut key)?;
            entries.push((partitioner.decorate(key), offset));
        }

        Ok(Self {
            summary: IndexSummary {
                min_index_interval,
                sampling_level,
                base_sampling_level,
                entries,
            },
            first_key: decode_opt_key(cursor)?,
            last_key: decode_opt_key(cursor)?,
            index_boundaries: decode_boundaries(cursor)?,
            data_boundaries: decode_boundaries(cursor)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ByteOrderedPartitioner;

    fn key(s: &str) -> DecoratedKey {
        ByteOrderedPartitioner.decorate(s.as_bytes().to_vec())
    }

    fn builder_with(n: usize, interval: usize) -> IndexSummaryBuilder {
        let mut builder = IndexSummaryBuilder::new(n as u64, interval, 128);
        for i in 0..n {
            let k = key(&format!("key_{i:06}"));
            let index_start = (i * 100) as u64;
            builder.maybe_add_entry(&k, index_start, index_start + 100, ((i + 1) * 1000) as u64);
        }
        builder
    }

    #[test]
    fn test_sampling_stride() {
        // ceil(1000 / 128) = 8 samples, starting with the first key.
        let builder = builder_with(1000, 128);
        let summary = builder.build(None);
        assert_eq!(summary.entry_count(), 8);
        assert_eq!(summary.entries()[0].0, key("key_000000"));
        assert_eq!(summary.entries()[1].0, key("key_000128"));
    }

    #[test]
    fn test_single_partition_summary() {
        let builder = builder_with(1, 128);
        assert_eq!(builder.build(None).entry_count(), 1);
    }

    #[test]
    fn test_boundary_requires_both_files() {
        let builder = builder_with(10, 1);
        let synced = builder.synced_offsets();

        assert!(builder.last_readable_boundary().is_none());

        // Index far ahead, data covering five samples.
        synced.mark_index_synced(1_000_000);
        synced.mark_data_synced(5_000);
        let boundary = builder.last_readable_boundary().unwrap();
        assert_eq!(boundary.summary_count, 5);
        assert_eq!(boundary.last_key, key("key_000004"));
        assert_eq!(boundary.data_length, 5_000);

        // Data catches up; the boundary advances, never retreats.
        synced.mark_data_synced(10_000);
        let boundary = builder.last_readable_boundary().unwrap();
        assert_eq!(boundary.summary_count, 10);
        synced.mark_data_synced(2_000);
        assert_eq!(builder.last_readable_boundary().unwrap().summary_count, 10);
    }

    #[test]
    fn test_build_restricted_to_boundary() {
        let builder = builder_with(10, 1);
        let synced = builder.synced_offsets();
        synced.mark_index_synced(300);
        synced.mark_data_synced(3_000);

        let boundary = builder.last_readable_boundary().unwrap();
        let summary = builder.build(Some(&boundary));
        assert_eq!(summary.entry_count(), 3);
        assert_eq!(
            summary.entries().last().unwrap().0,
            boundary.last_key
        );
    }

    #[test]
    fn test_mark_reset_keeps_sampling_deterministic() {
        let mut builder = IndexSummaryBuilder::new(100, 4, 128);
        for i in 0..6 {
            let k = key(&format!("key_{i:02}"));
            builder.maybe_add_entry(&k, i * 10, i * 10 + 10, i * 50 + 50);
        }
        let mark = builder.mark();
        for i in 6..10 {
            let k = key(&format!("key_{i:02}"));
            builder.maybe_add_entry(&k, i * 10, i * 10 + 10, i * 50 + 50);
        }
        assert_eq!(builder.build(None).entry_count(), 3); // keys 0, 4, 8

        builder.reset_to_mark(mark);
        for i in 6..10 {
            let k = key(&format!("alt_{i:02}"));
            builder.maybe_add_entry(&k, i * 10, i * 10 + 10, i * 50 + 50);
        }
        let summary = builder.build(None);
        // Same stride positions: partitions 0, 4, 8.
        assert_eq!(summary.entry_count(), 3);
        assert_eq!(summary.entries()[2].0, key("alt_08"));
    }

    #[test]
    fn test_search_finds_preceding_sample() {
        let builder = builder_with(1000, 128);
        let summary = builder.build(None);

        // Exact sample hit.
        assert_eq!(summary.search(&key("key_000128")), Some(12_800));
        // Between samples: lands on the sample before.
        assert_eq!(summary.search(&key("key_000200")), Some(12_800));
        // Before the first sample.
        assert_eq!(summary.search(&key("aaa")), None);
    }

    #[test]
    fn test_downsampling_density_and_determinism() {
        let builder = builder_with(12800, 128);
        let summary = builder.build(None);
        assert_eq!(summary.entry_count(), 100);

        let half = summary.downsample(64);
        assert_eq!(half.sampling_level(), 64);
        assert_eq!(half.entry_count(), 50);
        assert_eq!(half.effective_index_interval(), 256);
        // Deterministic: downsampling twice gives the same result.
        assert_eq!(summary.downsample(64), half);
        // Retained entries are a subset in the original order.
        let originals: Vec<_> = summary.entries().to_vec();
        for entry in half.entries() {
            assert!(originals.contains(entry));
        }
    }

    #[test]
    fn test_summary_file_roundtrip() {
        let builder = builder_with(1000, 128);
        let file = SummaryFile {
            summary: builder.build(None),
            first_key: Some(b"key_000000".to_vec()),
            last_key: Some(b"key_000999".to_vec()),
            index_boundaries: vec![0, 100, 200],
            data_boundaries: vec![0, 1000],
        };

        let mut buf = Vec::new();
        file.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = SummaryFile::decode_from(&mut cursor, &ByteOrderedPartitioner).unwrap();
        assert_eq!(decoded, file);
    }

    #[test]
    fn test_empty_summary_roundtrip() {
        let builder = builder_with(0, 128);
        let file = SummaryFile {
            summary: builder.build(None),
            first_key: None,
            last_key: None,
            index_boundaries: vec![],
            data_boundaries: vec![],
        };

        let mut buf = Vec::new();
        file.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = SummaryFile::decode_from(&mut cursor, &ByteOrderedPartitioner).unwrap();
        assert_eq!(decoded.summary.entry_count(), 0);
        assert_eq!(decoded.first_key, None);
    }
}
