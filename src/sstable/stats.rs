//! Incremental statistics collection and the `Statistics` component.
//!
//! The collector aggregates per-partition observations as content streams
//! through the writer; nothing is buffered. At prepare the aggregates are
//! frozen into [`StatsMetadata`] and serialized into the `Statistics` file,
//! a typed map of metadata kind to blob:
//!
//! ```text
//! +-----------+----------------------------------------------+
//! | count:u32 | count x (kind:u32, len:u32, blob)            |
//! +-----------+----------------------------------------------+
//! ```
//!
//! Kinds: Validation (partitioner + bloom fp chance), Stats (the
//! aggregates), Compaction (ancestry, bincode-encoded), Header (encoding
//! floors used by the row serializer).

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::partition::{
    decode_clustering, encode_clustering, Cell, Clustering, DeletionTime, NO_DELETION_TIME,
    NO_TIMESTAMP,
};

/// Histogram with exponentially widening buckets, for partition sizes and
/// cell counts. Values above the last boundary land in an overflow bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatedHistogram {
    bucket_offsets: Vec<u64>,
    buckets: Vec<u64>,
}

const DEFAULT_BUCKET_COUNT: usize = 90;
const BUCKET_GROWTH: f64 = 1.2;

impl Default for EstimatedHistogram {
    fn default() -> Self {
        Self::with_bucket_count(DEFAULT_BUCKET_COUNT)
    }
}

impl EstimatedHistogram {
    pub fn with_bucket_count(count: usize) -> Self {
        let mut bucket_offsets = Vec::with_capacity(count);
        let mut last = 1u64;
        bucket_offsets.push(last);
        while bucket_offsets.len() < count {
            let next = ((last as f64) * BUCKET_GROWTH) as u64;
            last = next.max(last + 1);
            bucket_offsets.push(last);
        }
        let buckets = vec![0u64; count + 1];
        Self {
            bucket_offsets,
            buckets,
        }
    }

    pub fn add(&mut self, value: u64) {
        let index = self.bucket_offsets.partition_point(|&b| b < value);
        self.buckets[index] += 1;
    }

    pub fn count(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// Upper boundary of the largest non-empty bucket; zero when empty.
    pub fn max(&self) -> u64 {
        match self.buckets.iter().rposition(|&c| c > 0) {
            None => 0,
            Some(index) => self
                .bucket_offsets
                .get(index)
                .copied()
                .unwrap_or(u64::MAX),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u32::<BigEndian>(self.bucket_offsets.len() as u32)
            .unwrap();
        for offset in &self.bucket_offsets {
            buf.write_u64::<BigEndian>(*offset).unwrap();
        }
        for bucket in &self.buckets {
            buf.write_u64::<BigEndian>(*bucket).unwrap();
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let count = cursor.read_u32::<BigEndian>()? as usize;
        let mut bucket_offsets = Vec::with_capacity(count);
        for _ in 0..count {
            bucket_offsets.push(cursor.read_u64::<BigEndian>()?);
        }
        let mut buckets = Vec::with_capacity(count + 1);
        for _ in 0..count + 1 {
            buckets.push(cursor.read_u64::<BigEndian>()?);
        }
        Ok(Self {
            bucket_offsets,
            buckets,
        })
    }
}

/// Frozen aggregates serialized under `MetadataKind::Stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsMetadata {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub min_local_deletion_time: u32,
    pub max_local_deletion_time: u32,
    pub min_ttl: u32,
    pub max_ttl: u32,
    pub partition_sizes: EstimatedHistogram,
    pub cells_per_partition: EstimatedHistogram,
    pub min_clustering: Option<Clustering>,
    pub max_clustering: Option<Clustering>,
    pub total_cells: u64,
    pub repaired_at: i64,
    pub first_key: Option<Vec<u8>>,
    pub last_key: Option<Vec<u8>>,
}

fn encode_opt_clustering(clustering: &Option<Clustering>, buf: &mut Vec<u8>) {
    match clustering {
        None => buf.push(0),
        Some(clustering) => {
            buf.push(1);
            encode_clustering(clustering, buf);
        }
    }
}

fn decode_opt_clustering(cursor: &mut Cursor<&[u8]>) -> Result<Option<Clustering>> {
    match cursor.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(decode_clustering(cursor)?)),
        other => Err(Error::InvalidData(format!(
            "bad clustering presence flag {other}"
        ))),
    }
}

fn encode_opt_bytes(bytes: &Option<Vec<u8>>, buf: &mut Vec<u8>) {
    match bytes {
        None => buf.write_u32::<BigEndian>(u32::MAX).unwrap(),
        Some(bytes) => {
            buf.write_u32::<BigEndian>(bytes.len() as u32).unwrap();
            buf.extend_from_slice(bytes);
        }
    }
}

fn decode_opt_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Option<Vec<u8>>> {
    match cursor.read_u32::<BigEndian>()? {
        u32::MAX => Ok(None),
        len => {
            let mut bytes = vec![0u8; len as usize];
            cursor.read_exact(&mut bytes)?;
            Ok(Some(bytes))
        }
    }
}

impl StatsMetadata {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_i64::<BigEndian>(self.min_timestamp).unwrap();
        buf.write_i64::<BigEndian>(self.max_timestamp).unwrap();
        buf.write_u32::<BigEndian>(self.min_local_deletion_time)
            .unwrap();
        buf.write_u32::<BigEndian>(self.max_local_deletion_time)
            .unwrap();
        buf.write_u32::<BigEndian>(self.min_ttl).unwrap();
        buf.write_u32::<BigEndian>(self.max_ttl).unwrap();
        self.partition_sizes.encode_into(buf);
        self.cells_per_partition.encode_into(buf);
        encode_opt_clustering(&self.min_clustering, buf);
        encode_opt_clustering(&self.max_clustering, buf);
        buf.write_u64::<BigEndian>(self.total_cells).unwrap();
        buf.write_i64::<BigEndian>(self.repaired_at).unwrap();
        encode_opt_bytes(&self.first_key, buf);
        encode_opt_bytes(&self.last_key, buf);
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            min_timestamp: cursor.read_i64::<BigEndian>()?,
            max_timestamp: cursor.read_i64::<BigEndian>()?,
            min_local_deletion_time: cursor.read_u32::<BigEndian>()?,
            max_local_deletion_time: cursor.read_u32::<BigEndian>()?,
            min_ttl: cursor.read_u32::<BigEndian>()?,
            max_ttl: cursor.read_u32::<BigEndian>()?,
            partition_sizes: EstimatedHistogram::decode_from(cursor)?,
            cells_per_partition: EstimatedHistogram::decode_from(cursor)?,
            min_clustering: decode_opt_clustering(cursor)?,
            max_clustering: decode_opt_clustering(cursor)?,
            total_cells: cursor.read_u64::<BigEndian>()?,
            repaired_at: cursor.read_i64::<BigEndian>()?,
            first_key: decode_opt_bytes(cursor)?,
            last_key: decode_opt_bytes(cursor)?,
        })
    }
}

/// Incremental aggregation over everything the writer streams.
#[derive(Debug)]
pub struct MetadataCollector {
    min_timestamp: i64,
    max_timestamp: i64,
    min_local_deletion_time: u32,
    max_local_deletion_time: u32,
    min_ttl: u32,
    max_ttl: u32,
    partition_sizes: EstimatedHistogram,
    cells_per_partition: EstimatedHistogram,
    min_clustering: Option<Clustering>,
    max_clustering: Option<Clustering>,
    total_cells: u64,
    repaired_at: i64,
}

impl MetadataCollector {
    pub fn new(repaired_at: i64) -> Self {
        Self {
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            min_local_deletion_time: u32::MAX,
            max_local_deletion_time: 0,
            min_ttl: u32::MAX,
            max_ttl: 0,
            partition_sizes: EstimatedHistogram::default(),
            cells_per_partition: EstimatedHistogram::default(),
            min_clustering: None,
            max_clustering: None,
            total_cells: 0,
            repaired_at,
        }
    }

    pub fn update_timestamp(&mut self, timestamp: i64) {
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
    }

    pub fn update_local_deletion_time(&mut self, local_deletion_time: u32) {
        self.min_local_deletion_time = self.min_local_deletion_time.min(local_deletion_time);
        self.max_local_deletion_time = self.max_local_deletion_time.max(local_deletion_time);
    }

    pub fn update_ttl(&mut self, ttl: u32) {
        self.min_ttl = self.min_ttl.min(ttl);
        self.max_ttl = self.max_ttl.max(ttl);
    }

    pub fn update_deletion_time(&mut self, deletion: DeletionTime) {
        if deletion.is_live() {
            return;
        }
        self.update_timestamp(deletion.marked_for_delete_at);
        self.update_local_deletion_time(deletion.local_deletion_time);
    }

    pub fn update_cell(&mut self, cell: &Cell) {
        self.update_timestamp(cell.timestamp);
        if let Some(ttl) = cell.ttl {
            self.update_ttl(ttl);
        }
        if cell.local_deletion_time != NO_DELETION_TIME {
            self.update_local_deletion_time(cell.local_deletion_time);
        }
        self.total_cells += 1;
    }

    pub fn update_clustering_values(&mut self, clustering: &Clustering) {
        if clustering.is_empty() {
            return;
        }
        match &self.min_clustering {
            None => self.min_clustering = Some(clustering.clone()),
            Some(min) if clustering < min => self.min_clustering = Some(clustering.clone()),
            _ => {}
        }
        match &self.max_clustering {
            None => self.max_clustering = Some(clustering.clone()),
            Some(max) if clustering > max => self.max_clustering = Some(clustering.clone()),
            _ => {}
        }
    }

    pub fn add_partition_size_in_bytes(&mut self, size: u64) {
        self.partition_sizes.add(size);
    }

    pub fn add_cells_per_partition(&mut self, cells: u64) {
        self.cells_per_partition.add(cells);
    }

    pub fn finalize(
        &self,
        first_key: Option<Vec<u8>>,
        last_key: Option<Vec<u8>>,
    ) -> StatsMetadata {
        StatsMetadata {
            min_timestamp: if self.min_timestamp == i64::MAX {
                NO_TIMESTAMP
            } else {
                self.min_timestamp
            },
            max_timestamp: if self.max_timestamp == i64::MIN {
                NO_TIMESTAMP
            } else {
                self.max_timestamp
            },
            min_local_deletion_time: self.min_local_deletion_time,
            max_local_deletion_time: self.max_local_deletion_time,
            min_ttl: if self.min_ttl == u32::MAX { 0 } else { self.min_ttl },
            max_ttl: self.max_ttl,
            partition_sizes: self.partition_sizes.clone(),
            cells_per_partition: self.cells_per_partition.clone(),
            min_clustering: self.min_clustering.clone(),
            max_clustering: self.max_clustering.clone(),
            total_cells: self.total_cells,
            repaired_at: self.repaired_at,
            first_key,
            last_key,
        }
    }
}

/// Blob kinds in the statistics file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Validation = 0,
    Stats = 1,
    Compaction = 2,
    Header = 3,
}

impl MetadataKind {
    fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(MetadataKind::Validation),
            1 => Ok(MetadataKind::Stats),
            2 => Ok(MetadataKind::Compaction),
            3 => Ok(MetadataKind::Header),
            other => Err(Error::InvalidData(format!("unknown metadata kind {other}"))),
        }
    }
}

/// Blob identifying how the table must be read back.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationMetadata {
    pub partitioner_name: String,
    pub bloom_fp_chance: f64,
}

impl ValidationMetadata {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        let name = self.partitioner_name.as_bytes();
        buf.write_u16::<BigEndian>(name.len() as u16).unwrap();
        buf.extend_from_slice(name);
        buf.write_f64::<BigEndian>(self.bloom_fp_chance).unwrap();
    }

    fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let len = cursor.read_u16::<BigEndian>()? as usize;
        let mut name = vec![0u8; len];
        cursor.read_exact(&mut name)?;
        Ok(Self {
            partitioner_name: String::from_utf8(name)
                .map_err(|e| Error::InvalidData(format!("partitioner name: {e}")))?,
            bloom_fp_chance: cursor.read_f64::<BigEndian>()?,
        })
    }
}

/// Opaque compaction bookkeeping; bincode-encoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionMetadata {
    /// Generations this table was compacted from.
    pub ancestors: Vec<u64>,
    pub estimated_key_count: u64,
}

/// Encoding floors the row serializer subtracted out, needed to decode
/// partition content. The flat serializer stores absolute values, so its
/// floors are the identity sentinels.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializationHeaderMeta {
    pub min_timestamp: i64,
    pub min_local_deletion_time: u32,
    pub min_ttl: u32,
}

impl Default for SerializationHeaderMeta {
    fn default() -> Self {
        Self {
            min_timestamp: 0,
            min_local_deletion_time: NO_DELETION_TIME,
            min_ttl: 0,
        }
    }
}

impl SerializationHeaderMeta {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_i64::<BigEndian>(self.min_timestamp).unwrap();
        buf.write_u32::<BigEndian>(self.min_local_deletion_time)
            .unwrap();
        buf.write_u32::<BigEndian>(self.min_ttl).unwrap();
    }

    fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            min_timestamp: cursor.read_i64::<BigEndian>()?,
            min_local_deletion_time: cursor.read_u32::<BigEndian>()?,
            min_ttl: cursor.read_u32::<BigEndian>()?,
        })
    }
}

/// The complete `Statistics` component.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsFile {
    pub validation: ValidationMetadata,
    pub stats: StatsMetadata,
    pub compaction: CompactionMetadata,
    pub header: SerializationHeaderMeta,
}

impl StatsFile {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut blobs: Vec<(MetadataKind, Vec<u8>)> = Vec::with_capacity(4);

        let mut validation = Vec::new();
        self.validation.encode_into(&mut validation);
        blobs.push((MetadataKind::Validation, validation));

        let mut stats = Vec::new();
        self.stats.encode_into(&mut stats);
        blobs.push((MetadataKind::Stats, stats));

        blobs.push((MetadataKind::Compaction, bincode::serialize(&self.compaction)?));

        let mut header = Vec::new();
        self.header.encode_into(&mut header);
        blobs.push((MetadataKind::Header, header));

        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(blobs.len() as u32).unwrap();
        for (kind, blob) in blobs {
            buf.write_u32::<BigEndian>(kind as u32).unwrap();
            buf.write_u32::<BigEndian>(blob.len() as u32).unwrap();
            buf.extend_from_slice(&blob);
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let count = cursor.read_u32::<BigEndian>()?;

        let mut validation = None;
        let mut stats = None;
        let mut compaction = None;
        let mut header = None;

        for _ in 0..count {
            let kind = MetadataKind::from_id(cursor.read_u32::<BigEndian>()?)?;
            let len = cursor.read_u32::<BigEndian>()? as usize;
            let mut blob = vec![0u8; len];
            cursor.read_exact(&mut blob)?;
            let mut blob_cursor = Cursor::new(blob.as_slice());

            match kind {
                MetadataKind::Validation => {
                    validation = Some(ValidationMetadata::decode_from(&mut blob_cursor)?)
                }
                MetadataKind::Stats => stats = Some(StatsMetadata::decode_from(&mut blob_cursor)?),
                MetadataKind::Compaction => compaction = Some(bincode::deserialize(&blob)?),
                MetadataKind::Header => {
                    header = Some(SerializationHeaderMeta::decode_from(&mut blob_cursor)?)
                }
            }
        }

        Ok(Self {
            validation: validation
                .ok_or_else(|| Error::InvalidData("missing validation metadata".to_string()))?,
            stats: stats.ok_or_else(|| Error::InvalidData("missing stats metadata".to_string()))?,
            compaction: compaction
                .ok_or_else(|| Error::InvalidData("missing compaction metadata".to_string()))?,
            header: header
                .ok_or_else(|| Error::InvalidData("missing header metadata".to_string()))?,
        })
    }
}
