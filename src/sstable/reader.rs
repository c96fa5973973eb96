//! Reader handles produced by the table writer.
//!
//! A reader is a frozen view: segmented files bounded at a durable length,
//! an index summary restricted to the same prefix, a shared bloom filter
//! handle, and the stats current at open time. Early-open readers sit on
//! the writer's temp-named files; the open file handles stay valid across
//! the commit rename.
//!
//! This is the verification surface of the writer, not a query engine:
//! lookups binary-search the summary, scan the primary index, and decode
//! whole partitions.

use std::io::Cursor;

use crate::error::Result;
use crate::io::SegmentedFile;
use crate::key::{DecoratedKey, PartitionerRef};
use crate::partition::{DeletionTime, Unfiltered};
use crate::sstable::bloom::BloomHandle;
use crate::sstable::entry::{decode_index_record, RowIndexEntry};
use crate::sstable::serializer::decode_partition;
use crate::sstable::stats::StatsMetadata;
use crate::sstable::summary::IndexSummary;
use crate::sstable::{Component, Descriptor};

/// Why the reader was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    /// Over a partial or pre-commit view handed out by a live writer.
    Early,
    /// Over the final contents at commit.
    Normal,
}

pub struct SSTableReader {
    descriptor: Descriptor,
    components: Vec<Component>,
    open_reason: OpenReason,
    partitioner: PartitionerRef,
    summary: IndexSummary,
    bloom: BloomHandle,
    data: SegmentedFile,
    index: SegmentedFile,
    stats: StatsMetadata,
    first: Option<DecoratedKey>,
    last: Option<DecoratedKey>,
}

impl SSTableReader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn internal_open(
        descriptor: Descriptor,
        components: Vec<Component>,
        partitioner: PartitionerRef,
        index: SegmentedFile,
        data: SegmentedFile,
        summary: IndexSummary,
        bloom: BloomHandle,
        stats: StatsMetadata,
        open_reason: OpenReason,
        first: Option<DecoratedKey>,
        last: Option<DecoratedKey>,
    ) -> Self {
        Self {
            descriptor,
            components,
            open_reason,
            partitioner,
            summary,
            bloom,
            data,
            index,
            stats,
            first,
            last,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn open_reason(&self) -> OpenReason {
        self.open_reason
    }

    pub fn summary(&self) -> &IndexSummary {
        &self.summary
    }

    pub fn stats(&self) -> &StatsMetadata {
        &self.stats
    }

    pub fn first(&self) -> Option<&DecoratedKey> {
        self.first.as_ref()
    }

    pub fn last(&self) -> Option<&DecoratedKey> {
        self.last.as_ref()
    }

    pub fn data_length(&self) -> u64 {
        self.data.length()
    }

    pub fn index_length(&self) -> u64 {
        self.index.length()
    }

    /// Bloom filter check; false means definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    /// Finds the index entry for an exact key, if present in this view.
    pub fn lookup(&self, raw_key: &[u8]) -> Result<Option<RowIndexEntry>> {
        if !self.bloom.may_contain(raw_key) {
            return Ok(None);
        }
        let key = self.partitioner.decorate(raw_key.to_vec());
        if let Some(last) = &self.last {
            if key > *last {
                return Ok(None);
            }
        }
        let start = match self.summary.search(&key) {
            Some(offset) => offset,
            None => return Ok(None),
        };

        // Scan forward from the sampled position; records are in key
        // order.
        let bytes = self.index.read_to_end(start)?;
        let mut cursor = Cursor::new(bytes.as_slice());
        while (cursor.position() as usize) < bytes.len() {
            let (record_key, entry) = decode_index_record(&mut cursor)?;
            let record_key = self.partitioner.decorate(record_key);
            if record_key == key {
                return Ok(Some(entry));
            }
            if record_key > key {
                break;
            }
        }
        Ok(None)
    }

    /// All `(key, entry)` records inside this view, in order.
    pub fn index_entries(&self) -> Result<Vec<(DecoratedKey, RowIndexEntry)>> {
        let bytes = self.index.read_to_end(0)?;
        let mut cursor = Cursor::new(bytes.as_slice());
        let mut entries = Vec::new();
        while (cursor.position() as usize) < bytes.len() {
            let (key, entry) = decode_index_record(&mut cursor)?;
            entries.push((self.partitioner.decorate(key), entry));
        }
        Ok(entries)
    }

    /// Decodes the partition starting at `entry`.
    pub fn read_partition(
        &self,
        entry: &RowIndexEntry,
    ) -> Result<(Vec<u8>, DeletionTime, Vec<Unfiltered>)> {
        let bytes = self.data.read_to_end(entry.position)?;
        let mut cursor = Cursor::new(bytes.as_slice());
        decode_partition(&mut cursor)
    }

    /// Every partition inside this view, in key order.
    pub fn scan(&self) -> Result<Vec<(Vec<u8>, DeletionTime, Vec<Unfiltered>)>> {
        let entries = self.index_entries()?;
        let mut partitions = Vec::with_capacity(entries.len());
        for window in entries.windows(2) {
            let extent = (window[1].1.position - window[0].1.position) as usize;
            let bytes = self.data.read_at(window[0].1.position, extent)?;
            partitions.push(decode_partition(&mut Cursor::new(bytes.as_slice()))?);
        }
        if let Some((_, last_entry)) = entries.last() {
            let bytes = self.data.read_to_end(last_entry.position)?;
            partitions.push(decode_partition(&mut Cursor::new(bytes.as_slice()))?);
        }
        Ok(partitions)
    }
}
