//! CinderDB's SSTable construction engine.
//!
//! An SSTable is the immutable on-disk unit of a log-structured
//! column-family store: a sorted set of partitions spread across several
//! interdependent component files. This crate builds them: the
//! [`sstable::writer::TableWriter`] accepts partitions in key order,
//! streams their content through a row serializer into a checksummed
//! (optionally compressed) data file, maintains the primary index, index
//! summary, and bloom filter in lockstep, and publishes the whole file set
//! atomically through a prepare/commit/abort pipeline. Partially-written
//! tables can be opened for reading early, bounded by the durable
//! readable boundary.

pub mod config;
pub mod error;
pub mod io;
pub mod key;
pub mod partition;
pub mod sstable;
pub mod tracker;

pub use config::{Config, CompressionParams};
pub use error::{Error, Result};
pub use key::{ByteOrderedPartitioner, DecoratedKey, HashedPartitioner, Partitioner};
pub use sstable::reader::SSTableReader;
pub use sstable::writer::TableWriter;
pub use sstable::{Component, Descriptor, Version};
pub use tracker::{TransactionLog, TransactionTracker};
