//! The partition content model: rows, cells, and range tombstone markers.
//!
//! A partition is streamed into the writer as a sorted sequence of
//! "unfiltered" units (rows and range-tombstone markers) behind a
//! [`PartitionIterator`]. The writer never interprets unit contents beyond
//! what statistics collection needs; encoding is owned by the row
//! serializer.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::key::DecoratedKey;

/// Sentinel local deletion time for live data.
pub const NO_DELETION_TIME: u32 = u32::MAX;

/// Sentinel timestamp for "never deleted".
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// A deletion marker: the timestamp the deletion shadows and the local
/// wall-clock second it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTime {
    pub marked_for_delete_at: i64,
    pub local_deletion_time: u32,
}

impl DeletionTime {
    pub const LIVE: DeletionTime = DeletionTime {
        marked_for_delete_at: NO_TIMESTAMP,
        local_deletion_time: NO_DELETION_TIME,
    };

    pub fn new(marked_for_delete_at: i64, local_deletion_time: u32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    pub fn is_live(&self) -> bool {
        *self == Self::LIVE
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u32::<BigEndian>(self.local_deletion_time).unwrap();
        buf.write_i64::<BigEndian>(self.marked_for_delete_at).unwrap();
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let local_deletion_time = cursor.read_u32::<BigEndian>()?;
        let marked_for_delete_at = cursor.read_i64::<BigEndian>()?;
        Ok(Self {
            marked_for_delete_at,
            local_deletion_time,
        })
    }
}

/// A single column value within a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub column: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
    /// Remaining time-to-live in seconds, if the cell is expiring.
    pub ttl: Option<u32>,
    /// Local deletion second for tombstone or expiring cells;
    /// `NO_DELETION_TIME` for live cells.
    pub local_deletion_time: u32,
}

impl Cell {
    pub fn live(column: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            timestamp,
            ttl: None,
            local_deletion_time: NO_DELETION_TIME,
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u16::<BigEndian>(self.column.len() as u16).unwrap();
        buf.extend_from_slice(&self.column);
        buf.write_i64::<BigEndian>(self.timestamp).unwrap();
        buf.write_u32::<BigEndian>(self.ttl.unwrap_or(0)).unwrap();
        buf.write_u32::<BigEndian>(self.local_deletion_time).unwrap();
        buf.write_u32::<BigEndian>(self.value.len() as u32).unwrap();
        buf.extend_from_slice(&self.value);
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let column_len = cursor.read_u16::<BigEndian>()? as usize;
        let mut column = vec![0u8; column_len];
        cursor.read_exact(&mut column)?;

        let timestamp = cursor.read_i64::<BigEndian>()?;
        let ttl = match cursor.read_u32::<BigEndian>()? {
            0 => None,
            t => Some(t),
        };
        let local_deletion_time = cursor.read_u32::<BigEndian>()?;

        let value_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut value = vec![0u8; value_len];
        cursor.read_exact(&mut value)?;

        Ok(Self {
            column,
            value,
            timestamp,
            ttl,
            local_deletion_time,
        })
    }
}

/// A clustering prefix: the ordered component values positioning a row or
/// marker within its partition.
pub type Clustering = Vec<Vec<u8>>;

pub(crate) fn encode_clustering(clustering: &Clustering, buf: &mut Vec<u8>) {
    buf.write_u16::<BigEndian>(clustering.len() as u16).unwrap();
    for component in clustering {
        buf.write_u16::<BigEndian>(component.len() as u16).unwrap();
        buf.extend_from_slice(component);
    }
}

pub(crate) fn decode_clustering(cursor: &mut Cursor<&[u8]>) -> Result<Clustering> {
    let count = cursor.read_u16::<BigEndian>()? as usize;
    let mut clustering = Vec::with_capacity(count);
    for _ in 0..count {
        let len = cursor.read_u16::<BigEndian>()? as usize;
        let mut component = vec![0u8; len];
        cursor.read_exact(&mut component)?;
        clustering.push(component);
    }
    Ok(clustering)
}

/// A row: a clustering position plus its cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub clustering: Clustering,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(clustering: Clustering, cells: Vec<Cell>) -> Self {
        Self { clustering, cells }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        encode_clustering(&self.clustering, buf);
        buf.write_u32::<BigEndian>(self.cells.len() as u32).unwrap();
        for cell in &self.cells {
            cell.encode_into(buf);
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let clustering = decode_clustering(cursor)?;
        let cell_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            cells.push(Cell::decode_from(cursor)?);
        }
        Ok(Self { clustering, cells })
    }
}

/// A range tombstone marker: either one bound of an open range, or a
/// boundary where one range closes and another opens at the same clustering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeTombstoneMarker {
    Bound {
        clustering: Clustering,
        deletion: DeletionTime,
        /// True when this bound opens the range, false when it closes it.
        open: bool,
    },
    Boundary {
        clustering: Clustering,
        end_deletion: DeletionTime,
        start_deletion: DeletionTime,
    },
}

impl RangeTombstoneMarker {
    pub fn clustering(&self) -> &Clustering {
        match self {
            RangeTombstoneMarker::Bound { clustering, .. } => clustering,
            RangeTombstoneMarker::Boundary { clustering, .. } => clustering,
        }
    }

    /// The deletion open at or after this marker, if any. Drives the
    /// open-tombstone bookkeeping at column index block boundaries.
    pub fn open_deletion(&self) -> Option<DeletionTime> {
        match self {
            RangeTombstoneMarker::Bound {
                deletion,
                open: true,
                ..
            } => Some(*deletion),
            RangeTombstoneMarker::Bound { open: false, .. } => None,
            RangeTombstoneMarker::Boundary { start_deletion, .. } => Some(*start_deletion),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            RangeTombstoneMarker::Bound {
                clustering,
                deletion,
                open,
            } => {
                buf.push(if *open { 0 } else { 1 });
                encode_clustering(clustering, buf);
                deletion.encode_into(buf);
            }
            RangeTombstoneMarker::Boundary {
                clustering,
                end_deletion,
                start_deletion,
            } => {
                buf.push(2);
                encode_clustering(clustering, buf);
                end_deletion.encode_into(buf);
                start_deletion.encode_into(buf);
            }
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let kind = cursor.read_u8()?;
        let clustering = decode_clustering(cursor)?;
        match kind {
            0 | 1 => Ok(RangeTombstoneMarker::Bound {
                clustering,
                deletion: DeletionTime::decode_from(cursor)?,
                open: kind == 0,
            }),
            2 => Ok(RangeTombstoneMarker::Boundary {
                clustering,
                end_deletion: DeletionTime::decode_from(cursor)?,
                start_deletion: DeletionTime::decode_from(cursor)?,
            }),
            other => Err(crate::Error::InvalidData(format!(
                "unknown range tombstone marker kind {other}"
            ))),
        }
    }
}

/// One unit of partition content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unfiltered {
    Row(Row),
    Marker(RangeTombstoneMarker),
}

impl Unfiltered {
    pub fn clustering(&self) -> &Clustering {
        match self {
            Unfiltered::Row(row) => &row.clustering,
            Unfiltered::Marker(marker) => marker.clustering(),
        }
    }
}

/// A sorted stream of partition content with its identity and
/// partition-level deletion.
pub trait PartitionIterator: Iterator<Item = Unfiltered> {
    fn partition_key(&self) -> &DecoratedKey;

    fn partition_level_deletion(&self) -> DeletionTime;

    /// True when the partition holds no units and no partition-level
    /// deletion; such partitions are skipped by the writer.
    fn is_empty(&self) -> bool;
}

/// A partition backed by an in-memory unit vector.
pub struct VecPartition {
    key: DecoratedKey,
    deletion: DeletionTime,
    units: std::vec::IntoIter<Unfiltered>,
}

impl VecPartition {
    pub fn new(key: DecoratedKey, deletion: DeletionTime, units: Vec<Unfiltered>) -> Self {
        Self {
            key,
            deletion,
            units: units.into_iter(),
        }
    }

    /// A live partition holding a single row of live cells, clustered at
    /// the root.
    pub fn with_cells(key: DecoratedKey, cells: Vec<Cell>) -> Self {
        Self::new(
            key,
            DeletionTime::LIVE,
            vec![Unfiltered::Row(Row::new(Vec::new(), cells))],
        )
    }
}

impl Iterator for VecPartition {
    type Item = Unfiltered;

    fn next(&mut self) -> Option<Self::Item> {
        self.units.next()
    }
}

impl PartitionIterator for VecPartition {
    fn partition_key(&self) -> &DecoratedKey {
        &self.key
    }

    fn partition_level_deletion(&self) -> DeletionTime {
        self.deletion
    }

    fn is_empty(&self) -> bool {
        self.deletion.is_live() && self.units.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_roundtrip() {
        let cell = Cell {
            column: b"col".to_vec(),
            value: b"value".to_vec(),
            timestamp: 42,
            ttl: Some(3600),
            local_deletion_time: 100,
        };

        let mut buf = Vec::new();
        cell.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(Cell::decode_from(&mut cursor).unwrap(), cell);
    }

    #[test]
    fn test_row_roundtrip() {
        let row = Row::new(
            vec![b"ck1".to_vec(), b"ck2".to_vec()],
            vec![
                Cell::live("a", "1", 10),
                Cell::live("b", "2", 20),
            ],
        );

        let mut buf = Vec::new();
        row.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(Row::decode_from(&mut cursor).unwrap(), row);
    }

    #[test]
    fn test_boundary_marker_roundtrip() {
        let marker = RangeTombstoneMarker::Boundary {
            clustering: vec![b"mid".to_vec()],
            end_deletion: DeletionTime::new(5, 50),
            start_deletion: DeletionTime::new(7, 70),
        };

        let mut buf = Vec::new();
        marker.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(
            RangeTombstoneMarker::decode_from(&mut cursor).unwrap(),
            marker
        );
    }

    #[test]
    fn test_open_deletion() {
        let open = RangeTombstoneMarker::Bound {
            clustering: vec![],
            deletion: DeletionTime::new(1, 1),
            open: true,
        };
        let close = RangeTombstoneMarker::Bound {
            clustering: vec![],
            deletion: DeletionTime::new(1, 1),
            open: false,
        };
        assert_eq!(open.open_deletion(), Some(DeletionTime::new(1, 1)));
        assert_eq!(close.open_deletion(), None);
    }
}
