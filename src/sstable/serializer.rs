//! The row-serialization collaborator and the stats-collecting projector.
//!
//! The table writer never encodes partition content itself; it hands the
//! (stats-instrumented) unit stream to a [`RowSerializer`], which streams
//! bytes into the data sink and reports the in-partition block layout back
//! as a [`ColumnIndex`].
//!
//! # Partition Block Layout
//!
//! ```text
//! +---------------------+------------------------+
//! | key len:u16 | key   | partition deletion     |
//! +---------------------+------------------------+
//! | flag:u8=1 | row     ...                      |
//! | flag:u8=2 | range tombstone marker ...       |
//! | ...                                          |
//! | flag:u8=0  (end of partition)                |
//! +----------------------------------------------+
//! ```

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::io::SequentialWriter;
use crate::partition::{
    DeletionTime, PartitionIterator, RangeTombstoneMarker, Row, Unfiltered,
};
use crate::sstable::entry::IndexBlock;
use crate::sstable::stats::{MetadataCollector, SerializationHeaderMeta};
use crate::sstable::Version;

const FLAG_END: u8 = 0;
const FLAG_ROW: u8 = 1;
const FLAG_MARKER: u8 = 2;

/// The in-partition block structure produced while streaming one
/// partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndex {
    /// Empty when the partition fit a single block.
    pub blocks: Vec<IndexBlock>,
}

/// Streams partition content into the data sink.
pub trait RowSerializer: Send {
    fn write_and_build_index(
        &self,
        iter: &mut dyn PartitionIterator,
        sink: &mut SequentialWriter,
        header: &SerializationHeaderMeta,
        version: Version,
        column_index_size: usize,
    ) -> Result<ColumnIndex>;
}

/// The stock serializer: length-prefixed flat encoding of rows and
/// markers, cutting a column index block roughly every
/// `column_index_size` bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatRowSerializer;

impl RowSerializer for FlatRowSerializer {
    fn write_and_build_index(
        &self,
        iter: &mut dyn PartitionIterator,
        sink: &mut SequentialWriter,
        _header: &SerializationHeaderMeta,
        _version: Version,
        column_index_size: usize,
    ) -> Result<ColumnIndex> {
        // Flat encoding stores absolute timestamps; the header floors and
        // version do not change the layout.
        let partition_start = sink.file_pointer();

        let key = iter.partition_key().key().to_vec();
        let mut head = Vec::with_capacity(key.len() + 14);
        head.write_u16::<BigEndian>(key.len() as u16).unwrap();
        head.extend_from_slice(&key);
        iter.partition_level_deletion().encode_into(&mut head);
        sink.write(&head)?;

        let mut blocks: Vec<IndexBlock> = Vec::new();
        let mut block_first = None;
        let mut block_last = None;
        let mut block_start = sink.file_pointer();
        let mut open_marker: Option<DeletionTime> = None;

        let mut unit_buf = Vec::new();
        while let Some(unit) = iter.next() {
            unit_buf.clear();
            match &unit {
                Unfiltered::Row(row) => {
                    unit_buf.push(FLAG_ROW);
                    row.encode_into(&mut unit_buf);
                }
                Unfiltered::Marker(marker) => {
                    unit_buf.push(FLAG_MARKER);
                    marker.encode_into(&mut unit_buf);
                    open_marker = marker.open_deletion();
                }
            }
            sink.write(&unit_buf)?;

            let clustering = unit.clustering().clone();
            if block_first.is_none() {
                block_first = Some(clustering.clone());
            }
            block_last = Some(clustering);

            let written = sink.file_pointer() - block_start;
            if written >= column_index_size as u64 {
                blocks.push(IndexBlock {
                    first_clustering: block_first.take().unwrap(),
                    last_clustering: block_last.take().unwrap(),
                    offset: block_start - partition_start,
                    width: written,
                    open_marker,
                });
                block_start = sink.file_pointer();
            }
        }
        sink.write(&[FLAG_END])?;

        // Close the trailing block.
        if let (Some(first), Some(last)) = (block_first, block_last) {
            blocks.push(IndexBlock {
                first_clustering: first,
                last_clustering: last,
                offset: block_start - partition_start,
                width: sink.file_pointer() - block_start,
                open_marker,
            });
        }

        // A single block carries no extra information over the entry's
        // base offset.
        if blocks.len() <= 1 {
            blocks.clear();
        }
        Ok(ColumnIndex { blocks })
    }
}

/// Decodes one partition block from a data-file slice; the inverse of
/// [`FlatRowSerializer`], used by readers and verification.
pub fn decode_partition(
    cursor: &mut Cursor<&[u8]>,
) -> Result<(Vec<u8>, DeletionTime, Vec<Unfiltered>)> {
    let key_len = cursor.read_u16::<BigEndian>()? as usize;
    let mut key = vec![0u8; key_len];
    cursor.read_exact(&mut key)?;
    let deletion = DeletionTime::decode_from(cursor)?;

    let mut units = Vec::new();
    loop {
        match cursor.read_u8()? {
            FLAG_END => break,
            FLAG_ROW => units.push(Unfiltered::Row(Row::decode_from(cursor)?)),
            FLAG_MARKER => {
                units.push(Unfiltered::Marker(RangeTombstoneMarker::decode_from(cursor)?))
            }
            other => {
                return Err(Error::InvalidData(format!(
                    "unknown partition unit flag {other}"
                )))
            }
        }
    }
    Ok((key, deletion, units))
}

/// Pass-through iterator that feeds the metadata collector as units stream
/// by. The wrapped partition is consumed exactly once; `finish` records
/// the per-partition cell count sample.
pub struct StatsCollector<'a, I: PartitionIterator> {
    inner: I,
    collector: &'a mut MetadataCollector,
    cell_count: u64,
}

impl<'a, I: PartitionIterator> StatsCollector<'a, I> {
    pub fn new(inner: I, collector: &'a mut MetadataCollector) -> Self {
        collector.update_deletion_time(inner.partition_level_deletion());
        Self {
            inner,
            collector,
            cell_count: 0,
        }
    }

    /// Records the accumulated cell count as one histogram sample.
    pub fn finish(self) {
        self.collector.add_cells_per_partition(self.cell_count);
    }
}

impl<I: PartitionIterator> Iterator for StatsCollector<'_, I> {
    type Item = Unfiltered;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = self.inner.next()?;
        match &unit {
            Unfiltered::Row(row) => {
                self.collector.update_clustering_values(&row.clustering);
                for cell in &row.cells {
                    self.collector.update_cell(cell);
                }
                self.cell_count += row.cells.len() as u64;
            }
            Unfiltered::Marker(marker) => {
                self.collector.update_clustering_values(marker.clustering());
                match marker {
                    RangeTombstoneMarker::Bound { deletion, .. } => {
                        self.collector.update_deletion_time(*deletion);
                    }
                    RangeTombstoneMarker::Boundary {
                        end_deletion,
                        start_deletion,
                        ..
                    } => {
                        self.collector.update_deletion_time(*end_deletion);
                        self.collector.update_deletion_time(*start_deletion);
                    }
                }
            }
        }
        Some(unit)
    }
}

impl<I: PartitionIterator> PartitionIterator for StatsCollector<'_, I> {
    fn partition_key(&self) -> &crate::key::DecoratedKey {
        self.inner.partition_key()
    }

    fn partition_level_deletion(&self) -> DeletionTime {
        self.inner.partition_level_deletion()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
