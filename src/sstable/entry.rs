//! Primary index records.
//!
//! Each accepted partition contributes one record to the primary index: a
//! short-length-prefixed key followed by a serialized [`RowIndexEntry`].
//! Small partitions carry no column index blocks; large ones describe the
//! in-partition block layout so a reader can seek within the partition
//! without scanning it from the start.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::partition::{decode_clustering, encode_clustering, Clustering, DeletionTime};

/// One in-partition column index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub first_clustering: Clustering,
    pub last_clustering: Clustering,
    /// Offset of the block within the partition (relative to the
    /// partition's start in the data file).
    pub offset: u64,
    /// Bytes covered by the block.
    pub width: u64,
    /// The range tombstone still open when the block ends, if any.
    pub open_marker: Option<DeletionTime>,
}

impl IndexBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        encode_clustering(&self.first_clustering, buf);
        encode_clustering(&self.last_clustering, buf);
        buf.write_u64::<BigEndian>(self.offset).unwrap();
        buf.write_u64::<BigEndian>(self.width).unwrap();
        match &self.open_marker {
            None => buf.push(0),
            Some(deletion) => {
                buf.push(1);
                deletion.encode_into(buf);
            }
        }
    }

    fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let first_clustering = decode_clustering(cursor)?;
        let last_clustering = decode_clustering(cursor)?;
        let offset = cursor.read_u64::<BigEndian>()?;
        let width = cursor.read_u64::<BigEndian>()?;
        let open_marker = match cursor.read_u8()? {
            0 => None,
            1 => Some(DeletionTime::decode_from(cursor)?),
            other => {
                return Err(Error::InvalidData(format!(
                    "bad open-marker flag {other} in index block"
                )))
            }
        };
        Ok(Self {
            first_clustering,
            last_clustering,
            offset,
            width,
            open_marker,
        })
    }
}

/// The per-partition record serialized into the primary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIndexEntry {
    /// Starting offset of the partition in the data file.
    pub position: u64,
    pub deletion_time: DeletionTime,
    /// Empty for partitions small enough to scan from `position`.
    pub blocks: Vec<IndexBlock>,
}

impl RowIndexEntry {
    pub fn new(position: u64, deletion_time: DeletionTime, blocks: Vec<IndexBlock>) -> Self {
        Self {
            position,
            deletion_time,
            blocks,
        }
    }

    /// Whether the partition carries an in-partition block index.
    pub fn is_indexed(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u64::<BigEndian>(self.position).unwrap();
        self.deletion_time.encode_into(buf);
        buf.write_u32::<BigEndian>(self.blocks.len() as u32).unwrap();
        for block in &self.blocks {
            block.encode_into(buf);
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let position = cursor.read_u64::<BigEndian>()?;
        let deletion_time = DeletionTime::decode_from(cursor)?;
        let block_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(IndexBlock::decode_from(cursor)?);
        }
        Ok(Self {
            position,
            deletion_time,
            blocks,
        })
    }
}

/// One full primary-index record: u16-length-prefixed key then the entry.
pub fn encode_index_record(key: &[u8], entry: &RowIndexEntry, buf: &mut Vec<u8>) {
    debug_assert!(key.len() <= u16::MAX as usize);
    buf.write_u16::<BigEndian>(key.len() as u16).unwrap();
    buf.extend_from_slice(key);
    entry.encode_into(buf);
}

/// Decodes one record, returning `(key, entry)`.
pub fn decode_index_record(cursor: &mut Cursor<&[u8]>) -> Result<(Vec<u8>, RowIndexEntry)> {
    let key_len = cursor.read_u16::<BigEndian>()? as usize;
    let mut key = vec![0u8; key_len];
    cursor.read_exact(&mut key)?;
    let entry = RowIndexEntry::decode_from(cursor)?;
    Ok((key, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> RowIndexEntry {
        RowIndexEntry::new(
            4096,
            DeletionTime::new(77, 7),
            vec![
                IndexBlock {
                    first_clustering: vec![b"a".to_vec()],
                    last_clustering: vec![b"m".to_vec()],
                    offset: 0,
                    width: 65536,
                    open_marker: None,
                },
                IndexBlock {
                    first_clustering: vec![b"n".to_vec()],
                    last_clustering: vec![b"z".to_vec()],
                    offset: 65536,
                    width: 1234,
                    open_marker: Some(DeletionTime::new(99, 9)),
                },
            ],
        )
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = sample_entry();
        let mut buf = Vec::new();
        entry.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(RowIndexEntry::decode_from(&mut cursor).unwrap(), entry);
    }

    #[test]
    fn test_unindexed_entry_roundtrip() {
        let entry = RowIndexEntry::new(0, DeletionTime::LIVE, Vec::new());
        assert!(!entry.is_indexed());

        let mut buf = Vec::new();
        entry.encode_into(&mut buf);
        let mut cursor = Cursor::new(buf.as_slice());
        assert_eq!(RowIndexEntry::decode_from(&mut cursor).unwrap(), entry);
    }

    #[test]
    fn test_index_record_roundtrip() {
        let entry = sample_entry();
        let mut buf = Vec::new();
        encode_index_record(b"partition-key", &entry, &mut buf);

        let mut cursor = Cursor::new(buf.as_slice());
        let (key, decoded) = decode_index_record(&mut cursor).unwrap();
        assert_eq!(key, b"partition-key");
        assert_eq!(decoded, entry);
        // Cursor consumed the record exactly.
        assert_eq!(cursor.position() as usize, buf.len());
    }
}
