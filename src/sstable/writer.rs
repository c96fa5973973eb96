//! The table writer: accepts sorted partitions and builds one SSTable
//! generation across all of its component files.
//!
//! The writer owns the data sink and the index writer, streams partition
//! content through the row serializer with a stats-collecting projector in
//! between, and drives the transactional pipeline at the end:
//!
//! ```text
//! prepare:  filter -> index -> summary -> data (+sidecars) -> stats -> toc
//! commit:   rename each in the same order, then fsync the directory
//! abort:    delete every temp and final name, notify the tracker
//! ```
//!
//! A writer instance is single-threaded: `append`, `mark`,
//! `reset_and_truncate` and the transactional calls must not run
//! concurrently. Readers obtained from `open_early`/`open_final_early` are
//! independent frozen views and may be used from other threads.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::sequential::write_sidecar;
use crate::io::{sync_parent_dir, FileMark, SegmentedFileBuilder, SequentialWriter};
use crate::key::{DecoratedKey, PartitionerRef, MAX_KEY_LENGTH};
use crate::partition::PartitionIterator;
use crate::sstable::entry::RowIndexEntry;
use crate::sstable::index::{remove_both, rename_component, IndexWriter};
use crate::sstable::reader::{OpenReason, SSTableReader};
use crate::sstable::serializer::{RowSerializer, StatsCollector};
use crate::sstable::stats::{
    CompactionMetadata, MetadataCollector, SerializationHeaderMeta, StatsFile, ValidationMetadata,
};
use crate::sstable::{write_toc, Component, Descriptor};
use crate::tracker::TransactionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

/// Rewind point spanning the data sink, the index writer, and the
/// writer's own bookkeeping.
struct WriterMark {
    data: FileMark,
    first: Option<DecoratedKey>,
    last: Option<DecoratedKey>,
    keys_written: u64,
}

pub struct TableWriter {
    descriptor: Descriptor,
    components: Vec<Component>,
    config: Config,
    partitioner: PartitionerRef,
    serializer: Box<dyn RowSerializer>,
    tracker: Arc<dyn TransactionTracker>,
    data_file: SequentialWriter,
    dbuilder: SegmentedFileBuilder,
    iwriter: IndexWriter,
    collector: MetadataCollector,
    header: SerializationHeaderMeta,
    first: Option<DecoratedKey>,
    last: Option<DecoratedKey>,
    keys_written: u64,
    mark: Option<WriterMark>,
    phase: Phase,
    open_result: bool,
    final_reader: Option<SSTableReader>,
}

impl TableWriter {
    /// Creates the writer and its component sinks. The tracker learns
    /// about the build before any file is created.
    pub fn create(
        descriptor: Descriptor,
        expected_keys: u64,
        repaired_at: i64,
        partitioner: PartitionerRef,
        config: Config,
        serializer: Box<dyn RowSerializer>,
        tracker: Arc<dyn TransactionTracker>,
    ) -> Result<Self> {
        tracker.track_new(&descriptor);

        let components =
            Component::for_build(config.compression.is_some(), config.write_digest);
        let digest_path = config
            .write_digest
            .then(|| descriptor.filename_for(Component::Digest));

        let mut data_file = match &config.compression {
            Some(params) => SequentialWriter::open_compressed(
                descriptor.filename_for(Component::Data),
                descriptor.filename_for(Component::CompressionInfo),
                digest_path,
                params,
            )?,
            None => SequentialWriter::open_checksummed(
                descriptor.filename_for(Component::Data),
                descriptor.filename_for(Component::Crc),
                digest_path,
                config.buffer_size,
            )?,
        };

        let iwriter = IndexWriter::new(
            descriptor.clone(),
            components.clone(),
            &config,
            expected_keys,
            &mut data_file,
        )?;

        Ok(Self {
            descriptor,
            components,
            config,
            partitioner,
            serializer,
            tracker,
            data_file,
            dbuilder: SegmentedFileBuilder::new(),
            iwriter,
            collector: MetadataCollector::new(repaired_at),
            header: SerializationHeaderMeta::default(),
            first: None,
            last: None,
            keys_written: 0,
            mark: None,
            phase: Phase::Open,
            open_result: false,
            final_reader: None,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Logical offset of the next data-file write.
    pub fn file_pointer(&self) -> u64 {
        self.data_file.file_pointer()
    }

    /// Physical data-file position; smaller than the logical pointer for
    /// a well-compressed stream.
    pub fn on_disk_file_pointer(&self) -> u64 {
        self.data_file.on_disk_file_pointer()
    }

    pub fn keys_written(&self) -> u64 {
        self.keys_written
    }

    /// Ask `prepare_to_commit` to also open the final reader; `commit`
    /// returns it.
    pub fn set_open_result(&mut self, open: bool) {
        self.open_result = open;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase != Phase::Open {
            return Err(Error::InvalidState(format!(
                "writer for generation {} is {:?}",
                self.descriptor.generation, self.phase
            )));
        }
        Ok(())
    }

    /// Appends one partition. Returns `None` without writing when the
    /// partition is empty or its key exceeds the u16 length ceiling.
    pub fn append<I: PartitionIterator>(&mut self, partition: I) -> Result<Option<RowIndexEntry>> {
        self.ensure_open()?;

        let key = partition.partition_key().clone();
        if key.key().len() > MAX_KEY_LENGTH {
            error!(
                key_len = key.key().len(),
                max = MAX_KEY_LENGTH,
                "key size exceeds maximum, skipping partition"
            );
            return Ok(None);
        }
        if partition.is_empty() {
            return Ok(None);
        }
        if let Some(last) = &self.last {
            // Upstream feeds sorted distinct partitions.
            debug_assert!(last < &key, "partition keys out of order");
            if last >= &key {
                return Err(Error::InvalidState(
                    "partition keys out of order".to_string(),
                ));
            }
        }

        let start_position = self.data_file.file_pointer();
        let deletion = partition.partition_level_deletion();

        let mut stats_iter = StatsCollector::new(partition, &mut self.collector);
        let column_index = self.serializer.write_and_build_index(
            &mut stats_iter,
            &mut self.data_file,
            &self.header,
            self.descriptor.version,
            self.config.column_index_size,
        )?;
        stats_iter.finish();

        let entry = RowIndexEntry::new(start_position, deletion, column_index.blocks);
        let end_position = self.data_file.file_pointer();
        let row_size = end_position - start_position;
        self.maybe_warn_large_partition(&key, row_size);
        self.collector.add_partition_size_in_bytes(row_size);

        debug!(
            key = %String::from_utf8_lossy(key.key()),
            position = start_position,
            bytes = row_size,
            "wrote partition"
        );

        self.dbuilder.add_potential_boundary(start_position);
        self.iwriter.append(&key, &entry, end_position)?;
        if self.first.is_none() {
            self.first = Some(key.clone());
        }
        self.last = Some(key);
        self.keys_written += 1;
        Ok(Some(entry))
    }

    /// True when the partition crossed the warning threshold and a log
    /// line was emitted.
    fn maybe_warn_large_partition(&self, key: &DecoratedKey, row_size: u64) -> bool {
        if row_size <= self.config.large_partition_threshold {
            return false;
        }
        warn!(
            keyspace = %self.descriptor.keyspace,
            table = %self.descriptor.table,
            key = %String::from_utf8_lossy(key.key()),
            bytes = row_size,
            "writing large partition"
        );
        true
    }

    /// Captures a joint rewind point across the data and index sinks. The
    /// summary's sampling counters are snapshotted too; the bloom filter
    /// is not (rewound keys stay as harmless false positives).
    pub fn mark(&mut self) -> Result<()> {
        self.ensure_open()?;
        let data = self.data_file.mark()?;
        self.iwriter.mark()?;
        self.mark = Some(WriterMark {
            data,
            first: self.first.clone(),
            last: self.last.clone(),
            keys_written: self.keys_written,
        });
        Ok(())
    }

    /// Discards everything appended since the last `mark`.
    pub fn reset_and_truncate(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mark = self
            .mark
            .as_ref()
            .ok_or_else(|| Error::InvalidState("reset without a mark".to_string()))?;

        self.data_file.reset_and_truncate(&mark.data)?;
        self.iwriter.reset_and_truncate()?;
        self.dbuilder.truncate_to(mark.data.position());

        self.first = mark.first.clone();
        self.last = mark.last.clone();
        self.keys_written = mark.keys_written;
        Ok(())
    }

    /// Opens a reader over the durable prefix, if any sampled partition is
    /// fully fsynced in both files. Safe to call while appends continue:
    /// the view is frozen at the boundary and the bloom handle is a
    /// snapshot reference.
    pub fn open_early(&self) -> Result<Option<SSTableReader>> {
        let boundary = match self.iwriter.get_max_readable() {
            None => return Ok(None),
            Some(boundary) => boundary,
        };

        let summary = self.iwriter.build_summary(Some(&boundary));
        let ifile = self.iwriter.build_index_view(boundary.index_length)?;
        let dfile = match self.data_file.compression_info(boundary.data_length) {
            Some(info) => self
                .dbuilder
                .build_compressed(self.data_file.path(), info)?,
            None => self
                .dbuilder
                .build(self.data_file.path(), boundary.data_length)?,
        };
        let stats = self.collector.finalize(
            self.first.as_ref().map(|k| k.key().to_vec()),
            Some(boundary.last_key.key().to_vec()),
        );

        Ok(Some(SSTableReader::internal_open(
            self.descriptor.clone(),
            self.components.clone(),
            Arc::clone(&self.partitioner),
            ifile,
            dfile,
            summary,
            self.iwriter.shared_bloom(),
            stats,
            OpenReason::Early,
            self.first.clone(),
            Some(boundary.last_key),
        )))
    }

    /// Fsyncs data and index without closing them and opens a reader over
    /// the entire current contents. No appends are accepted afterwards.
    pub fn open_final_early(&mut self) -> Result<SSTableReader> {
        self.data_file.flush_tail_and_sync()?;
        self.iwriter.sync()?;
        self.open_final(OpenReason::Early)
    }

    fn open_final(&self, reason: OpenReason) -> Result<SSTableReader> {
        let summary = self.iwriter.build_summary(None);
        let ifile = self.iwriter.build_index_view(self.iwriter.file_pointer())?;
        let data_length = self.data_file.file_pointer();
        let dfile = match self.data_file.compression_info(data_length) {
            Some(info) => self
                .dbuilder
                .build_compressed(self.data_file.path(), info)?,
            None => self.dbuilder.build(self.data_file.path(), data_length)?,
        };
        let stats = self.collector.finalize(
            self.first.as_ref().map(|k| k.key().to_vec()),
            self.last.as_ref().map(|k| k.key().to_vec()),
        );

        Ok(SSTableReader::internal_open(
            self.descriptor.clone(),
            self.components.clone(),
            Arc::clone(&self.partitioner),
            ifile,
            dfile,
            summary,
            self.iwriter.shared_bloom(),
            stats,
            reason,
            self.first.clone(),
            self.last.clone(),
        ))
    }

    fn write_stats(&self) -> Result<()> {
        let stats_file = StatsFile {
            validation: ValidationMetadata {
                partitioner_name: self.partitioner.name().to_string(),
                bloom_fp_chance: self.config.bloom_fp_chance,
            },
            stats: self.collector.finalize(
                self.first.as_ref().map(|k| k.key().to_vec()),
                self.last.as_ref().map(|k| k.key().to_vec()),
            ),
            compaction: CompactionMetadata {
                ancestors: Vec::new(),
                estimated_key_count: self.keys_written,
            },
            header: self.header.clone(),
        };
        write_sidecar(
            &self.descriptor.filename_for(Component::Statistics),
            &stats_file.encode()?,
        )
    }

    /// First transactional phase. Every step executes even if an earlier
    /// one failed; any accumulated failure aborts the build and surfaces
    /// the composite error.
    pub fn prepare_to_commit(&mut self) -> Result<()> {
        match self.phase {
            Phase::Prepared | Phase::Committed => return Ok(()),
            Phase::Aborted => {
                return Err(Error::InvalidState(
                    "prepare on aborted writer".to_string(),
                ))
            }
            Phase::Open | Phase::Preparing => {}
        }
        self.phase = Phase::Preparing;

        let first_key = self.first.as_ref().map(|k| k.key().to_vec());
        let last_key = self.last.as_ref().map(|k| k.key().to_vec());
        let data_boundaries = self.dbuilder.snapshot(self.data_file.file_pointer());

        let mut acc = Error::accumulate(
            None,
            self.iwriter
                .prepare_to_commit(first_key, last_key, data_boundaries),
        );
        acc = Error::accumulate(acc, self.data_file.prepare_to_commit());
        acc = Error::accumulate(acc, self.write_stats());
        acc = Error::accumulate(acc, write_toc(&self.descriptor, &self.components));

        if let Some(err) = acc {
            let err = self.do_abort(Some(err)).expect("abort after failed prepare");
            return Err(err);
        }

        if self.open_result {
            match self.open_final(OpenReason::Normal) {
                Ok(reader) => self.final_reader = Some(reader),
                Err(err) => {
                    let err = self.do_abort(Some(err)).expect("abort after failed open");
                    return Err(err);
                }
            }
        }

        self.phase = Phase::Prepared;
        Ok(())
    }

    /// Second transactional phase: renames every component into place in
    /// the pipeline order and fsyncs the directory. After the TOC rename
    /// the table is committed; a directory fsync failure is logged but no
    /// longer fails the build.
    pub fn commit(&mut self) -> Result<Option<SSTableReader>> {
        match self.phase {
            Phase::Committed => return Ok(self.final_reader.take()),
            Phase::Prepared => {}
            phase => {
                return Err(Error::InvalidState(format!(
                    "commit on {phase:?} writer"
                )))
            }
        }

        let mut acc = self.iwriter.commit(None);
        acc = Error::accumulate(acc, self.data_file.commit());
        acc = Error::accumulate(acc, rename_component(&self.descriptor, Component::Statistics));
        acc = Error::accumulate(acc, rename_component(&self.descriptor, Component::Toc));

        if let Some(err) = acc {
            let err = self.do_abort(Some(err)).expect("abort after failed commit");
            return Err(err);
        }

        if let Err(err) = sync_parent_dir(&self.descriptor.filename_for(Component::Toc)) {
            warn!(error = %err, "directory fsync after commit failed");
        }

        self.phase = Phase::Committed;
        self.tracker.on_commit(&self.descriptor);
        info!(
            keyspace = %self.descriptor.keyspace,
            table = %self.descriptor.table,
            generation = self.descriptor.generation,
            keys = self.keys_written,
            bytes = self.data_file.file_pointer(),
            "sstable build committed"
        );
        Ok(self.final_reader.take())
    }

    /// Prepare and commit in one call.
    pub fn finish(&mut self, open_result: bool) -> Result<Option<SSTableReader>> {
        self.open_result = open_result;
        self.prepare_to_commit()?;
        self.commit()
    }

    /// Deletes every temp and final file of this generation and notifies
    /// the tracker. Valid from any pre-commit state; idempotent.
    pub fn abort(&mut self) -> Result<()> {
        match self.do_abort(None) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn do_abort(&mut self, mut acc: Option<Error>) -> Option<Error> {
        match self.phase {
            Phase::Aborted => return acc,
            Phase::Committed => {
                return Error::accumulate(
                    acc,
                    Err(Error::InvalidState("abort on committed writer".to_string())),
                )
            }
            _ => {}
        }
        self.phase = Phase::Aborted;

        acc = self.iwriter.abort(acc);
        if self.data_file.is_committed() {
            acc = Error::accumulate(acc, remove_both(&self.descriptor, Component::Data));
        } else {
            acc = Error::accumulate(acc, self.data_file.abort());
        }
        for component in [
            Component::Crc,
            Component::CompressionInfo,
            Component::Digest,
            Component::Statistics,
            Component::Toc,
        ] {
            acc = Error::accumulate(acc, remove_both(&self.descriptor, component));
        }

        self.tracker.on_abort(&self.descriptor);
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionParams;
    use crate::key::ByteOrderedPartitioner;
    use crate::partition::{Cell, DeletionTime, Row, Unfiltered, VecPartition};
    use crate::sstable::read_toc;
    use crate::tracker::{TrackedState, TransactionLog};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        tracker: Arc<TransactionLog>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                tracker: Arc::new(TransactionLog::new()),
            }
        }

        fn descriptor(&self, generation: u64) -> Descriptor {
            Descriptor::new(self.dir.path(), "ks", "events", generation)
        }

        fn writer(&self, generation: u64, expected_keys: u64, config: Config) -> TableWriter {
            TableWriter::create(
                self.descriptor(generation),
                expected_keys,
                0,
                Arc::new(ByteOrderedPartitioner),
                config,
                Box::new(crate::sstable::serializer::FlatRowSerializer),
                self.tracker.clone(),
            )
            .unwrap()
        }

        /// File names in the directory that do not carry the temp suffix.
        fn final_files(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| !name.ends_with("-tmp"))
                .collect();
            names.sort();
            names
        }
    }

    fn partition(key: &str, cells: Vec<Cell>) -> VecPartition {
        VecPartition::with_cells(
            crate::key::Partitioner::decorate(&ByteOrderedPartitioner, key.as_bytes().to_vec()),
            cells,
        )
    }

    fn tiny_partition(key: &str) -> VecPartition {
        partition(key, vec![Cell::live("col", "1", 1)])
    }

    #[test]
    fn test_three_tiny_partitions() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 3, Config::default());

        for key in ["a", "b", "c"] {
            assert!(writer.append(tiny_partition(key)).unwrap().is_some());
        }
        let reader = writer.finish(true).unwrap().expect("final reader");

        // Index carries three records at increasing positions.
        let entries = reader.index_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].1.position < w[1].1.position));

        // One summary sample: the first key at offset zero.
        assert_eq!(reader.summary().entry_count(), 1);
        assert_eq!(reader.summary().entries()[0].0.key(), b"a");
        assert_eq!(reader.summary().entries()[0].1, 0);

        // Filter answers for the written keys.
        for key in ["a", "b", "c"] {
            assert!(reader.may_contain(key.as_bytes()));
        }

        // TOC lists the seven declared kinds, matching disk contents.
        let toc = read_toc(&harness.descriptor(1)).unwrap();
        assert_eq!(toc.len(), 7);
        let mut toc_names: Vec<String> = toc
            .iter()
            .map(|c| {
                harness
                    .descriptor(1)
                    .filename_for(*c)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        toc_names.sort();
        assert_eq!(harness.final_files(), toc_names);

        assert_eq!(
            harness.tracker.state_of(&harness.descriptor(1)).unwrap(),
            Some(TrackedState::Committed)
        );
    }

    #[test]
    fn test_round_trip_partitions_bit_identical() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 10, Config::default());

        let mut expected = Vec::new();
        for i in 0..10 {
            let key = format!("key_{i:03}");
            let cells = vec![
                Cell::live("col_a", format!("value_{i}"), i as i64),
                Cell::live("col_b", vec![i as u8; 100], i as i64 + 1),
            ];
            expected.push((key.clone().into_bytes(), cells.clone()));
            writer.append(partition(&key, cells)).unwrap();
        }
        let reader = writer.finish(true).unwrap().unwrap();

        // Lookup through the primary index returns each partition intact.
        for (key, cells) in &expected {
            let entry = reader.lookup(key).unwrap().expect("key indexed");
            let (read_key, deletion, units) = reader.read_partition(&entry).unwrap();
            assert_eq!(&read_key, key);
            assert!(deletion.is_live());
            assert_eq!(
                units,
                vec![Unfiltered::Row(Row::new(Vec::new(), cells.clone()))]
            );
        }

        // Absent key: not found through the index either.
        assert!(reader.lookup(b"key_999").unwrap().is_none());
    }

    #[test]
    fn test_rewind_discards_unmarked_suffix() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 4, Config::default());

        writer.append(tiny_partition("a")).unwrap();
        writer.append(tiny_partition("b")).unwrap();
        writer.mark().unwrap();
        writer.append(tiny_partition("c")).unwrap();
        writer.reset_and_truncate().unwrap();
        writer.append(tiny_partition("c2")).unwrap();
        writer.append(tiny_partition("d")).unwrap();

        let reader = writer.finish(true).unwrap().unwrap();
        let keys: Vec<Vec<u8>> = reader
            .scan()
            .unwrap()
            .into_iter()
            .map(|(key, _, _)| key)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c2".to_vec(), b"d".to_vec()]);

        // The rewound key may still test positive; that is harmless.
        assert!(reader.lookup(b"c").unwrap().is_none());
    }

    #[test]
    fn test_open_early_none_before_sync_then_bounded() {
        let harness = Harness::new();
        let config = Config::default().min_index_interval(1).buffer_size(1 << 20);
        let mut writer = harness.writer(1, 10_000, config);

        for i in 0..10_000 {
            writer
                .append(tiny_partition(&format!("key_{i:05}")))
                .unwrap();
        }
        // Nothing fsynced yet.
        assert!(writer.open_early().unwrap().is_none());

        let reader = writer.open_final_early().unwrap();
        assert_eq!(reader.open_reason(), OpenReason::Early);
        assert_eq!(reader.last().unwrap().key(), b"key_09999");
        assert_eq!(reader.index_entries().unwrap().len(), 10_000);

        writer.finish(false).unwrap();
    }

    #[test]
    fn test_open_early_respects_boundary() {
        let harness = Harness::new();
        // Small buffers so appends flush to the OS as they go.
        let config = Config::default().min_index_interval(1).buffer_size(64);
        let mut writer = harness.writer(1, 100, config);

        for i in 0..50 {
            writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .unwrap();
        }
        let early = writer.open_early().unwrap();
        // Buffer flushes alone do not advance the boundary.
        assert!(early.is_none());

        let frozen = writer.open_final_early().unwrap();
        for i in 50..60 {
            // Writer is sealed after open_final_early; appends now fail.
            assert!(writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .is_err());
        }
        // The frozen reader covers exactly the synced prefix.
        assert_eq!(frozen.index_entries().unwrap().len(), 50);
        let last = frozen.last().unwrap().key().to_vec();
        assert_eq!(last, b"key_0049".to_vec());
        writer.abort().unwrap();
    }

    #[test]
    fn test_early_boundary_mid_stream() {
        let harness = Harness::new();
        let config = Config::default().min_index_interval(1);
        let mut writer = harness.writer(1, 100, config);

        for i in 0..30 {
            writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .unwrap();
        }
        // Force both sinks durable mid-stream, then keep appending.
        writer.data_file.sync().unwrap();
        writer.iwriter.sync().unwrap();
        for i in 30..60 {
            writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .unwrap();
        }

        let reader = writer.open_early().unwrap().expect("boundary exists");
        assert_eq!(reader.last().unwrap().key(), b"key_0029");
        let entries = reader.index_entries().unwrap();
        assert_eq!(entries.len(), 30);
        // Every key served is within the boundary.
        for (key, _) in &entries {
            assert!(key.key() <= b"key_0029".as_slice());
        }

        // The writer keeps going; the reader view stays frozen.
        writer.finish(false).unwrap();
        assert_eq!(reader.index_entries().unwrap().len(), 30);
    }

    #[test]
    fn test_abort_leaves_only_temp_free_directory() {
        let harness = Harness::new();
        let mut writer = harness.writer(7, 100, Config::default());
        for i in 0..100 {
            writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .unwrap();
        }
        writer.abort().unwrap();

        assert!(harness.final_files().is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(harness.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
        assert_eq!(
            harness.tracker.state_of(&harness.descriptor(7)).unwrap(),
            Some(TrackedState::Aborted)
        );
    }

    /// Delegates to the flat serializer until a configured append, then
    /// fails the data write as a full disk would.
    struct FailingSerializer {
        fail_after: std::cell::Cell<u64>,
    }

    impl RowSerializer for FailingSerializer {
        fn write_and_build_index(
            &self,
            iter: &mut dyn PartitionIterator,
            sink: &mut SequentialWriter,
            header: &SerializationHeaderMeta,
            version: crate::sstable::Version,
            column_index_size: usize,
        ) -> Result<crate::sstable::serializer::ColumnIndex> {
            let remaining = self.fail_after.get();
            if remaining == 0 {
                return Err(Error::Write {
                    path: sink.path().to_path_buf(),
                    cause: "No space left on device".to_string(),
                });
            }
            self.fail_after.set(remaining - 1);
            crate::sstable::serializer::FlatRowSerializer.write_and_build_index(
                iter,
                sink,
                header,
                version,
                column_index_size,
            )
        }
    }

    #[test]
    fn test_write_error_surfaces_and_abort_cleans_up() {
        let harness = Harness::new();
        let mut writer = TableWriter::create(
            harness.descriptor(3),
            200,
            0,
            Arc::new(ByteOrderedPartitioner),
            Config::default(),
            Box::new(FailingSerializer {
                fail_after: std::cell::Cell::new(100),
            }),
            harness.tracker.clone(),
        )
        .unwrap();

        for i in 0..100 {
            writer
                .append(tiny_partition(&format!("key_{i:04}")))
                .unwrap();
        }
        let err = writer
            .append(tiny_partition("key_0100"))
            .expect_err("101st data write fails");
        assert!(matches!(err, Error::Write { .. }));

        writer.abort().unwrap();
        assert!(harness.final_files().is_empty());
        assert_eq!(
            harness.tracker.state_of(&harness.descriptor(3)).unwrap(),
            Some(TrackedState::Aborted)
        );
    }

    #[test]
    fn test_append_after_abort_fails() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 10, Config::default());
        writer.append(tiny_partition("a")).unwrap();
        writer.abort().unwrap();

        assert!(writer.append(tiny_partition("b")).is_err());
        assert!(writer.prepare_to_commit().is_err());
        // Abort is idempotent.
        writer.abort().unwrap();
    }

    #[test]
    fn test_oversized_key_is_skipped() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 10, Config::default());

        let oversized = "k".repeat(u16::MAX as usize + 1);
        assert!(writer.append(tiny_partition(&oversized)).unwrap().is_none());
        assert_eq!(writer.file_pointer(), 0);
        assert_eq!(writer.keys_written(), 0);

        // The writer keeps accepting normal partitions.
        writer.append(tiny_partition("a")).unwrap();
        let reader = writer.finish(true).unwrap().unwrap();
        assert_eq!(reader.index_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_partition_is_skipped() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 10, Config::default());
        let empty = VecPartition::new(
            crate::key::Partitioner::decorate(&ByteOrderedPartitioner, b"empty".to_vec()),
            DeletionTime::LIVE,
            Vec::new(),
        );
        assert!(writer.append(empty).unwrap().is_none());
        writer.abort().unwrap();
    }

    #[test]
    fn test_out_of_order_key_is_a_programmer_error() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 10, Config::default());
        writer.append(tiny_partition("m")).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            writer.append(tiny_partition("a"))
        }));
        match result {
            // Release builds surface an error instead of asserting.
            Ok(appended) => assert!(appended.is_err()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_empty_writer_commits_valid_table() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 0, Config::default());
        let reader = writer.finish(true).unwrap().unwrap();

        assert_eq!(reader.data_length(), 0);
        assert_eq!(reader.index_length(), 0);
        assert_eq!(reader.summary().entry_count(), 0);
        assert!(reader.first().is_none());
        assert!(!reader.may_contain(b"anything"));

        let toc = read_toc(&harness.descriptor(1)).unwrap();
        assert_eq!(toc.len(), 7);
    }

    #[test]
    fn test_large_partition_warning_threshold() {
        let harness = Harness::new();
        let config = Config::default().large_partition_threshold(1024);
        let mut writer = harness.writer(1, 2, config);

        writer.append(tiny_partition("a")).unwrap();
        let big = partition("big", vec![Cell::live("col", vec![0u8; 4096], 1)]);
        writer.append(big).unwrap();

        let key = crate::key::Partitioner::decorate(&ByteOrderedPartitioner, b"big".to_vec());
        assert!(writer.maybe_warn_large_partition(&key, 5000));
        assert!(!writer.maybe_warn_large_partition(&key, 100));

        // The build still commits.
        writer.finish(false).unwrap();
        assert_eq!(
            harness.tracker.state_of(&harness.descriptor(1)).unwrap(),
            Some(TrackedState::Committed)
        );
    }

    #[test]
    fn test_compressed_variant() {
        let harness = Harness::new();
        let config = Config::default().compression(CompressionParams::default());
        let mut writer = harness.writer(1, 3, config);

        // Highly compressible payloads.
        let payload = vec![b'x'; 32 * 1024];
        for key in ["a", "b", "c"] {
            writer
                .append(partition(key, vec![Cell::live("col", payload.clone(), 1)]))
                .unwrap();
        }
        let logical = writer.file_pointer();
        let on_disk = writer.on_disk_file_pointer();
        let reader = writer.finish(true).unwrap().unwrap();

        let descriptor = harness.descriptor(1);
        assert!(descriptor
            .filename_for(Component::CompressionInfo)
            .exists());
        assert!(!descriptor.filename_for(Component::Crc).exists());
        let toc = read_toc(&descriptor).unwrap();
        assert!(toc.contains(&Component::CompressionInfo));
        assert!(!toc.contains(&Component::Crc));

        // Compressible payload lands smaller on disk than its logical size.
        let physical = std::fs::metadata(descriptor.filename_for(Component::Data))
            .unwrap()
            .len();
        assert!(on_disk <= logical);
        assert!(physical < logical);

        // And reads back bit-identical through the chunk map.
        for key in ["a", "b", "c"] {
            let entry = reader.lookup(key.as_bytes()).unwrap().unwrap();
            let (read_key, _, units) = reader.read_partition(&entry).unwrap();
            assert_eq!(read_key, key.as_bytes());
            assert_eq!(
                units,
                vec![Unfiltered::Row(Row::new(
                    Vec::new(),
                    vec![Cell::live("col", payload.clone(), 1)]
                ))]
            );
        }
    }

    #[test]
    fn test_digest_component_is_opt_in() {
        let harness = Harness::new();
        let config = Config::default().write_digest(true);
        let mut writer = harness.writer(1, 1, config);
        writer.append(tiny_partition("a")).unwrap();
        writer.finish(false).unwrap();

        let descriptor = harness.descriptor(1);
        let digest_path = descriptor.filename_for(Component::Digest);
        assert!(digest_path.exists());

        let toc = read_toc(&descriptor).unwrap();
        assert_eq!(toc.len(), 8);
        assert!(toc.contains(&Component::Digest));

        // The digest is the decimal CRC of the logical data stream.
        let data = std::fs::read(descriptor.filename_for(Component::Data)).unwrap();
        let digest = std::fs::read_to_string(&digest_path).unwrap();
        assert_eq!(
            digest.trim().parse::<u32>().unwrap(),
            crate::io::checksum::crc32(&data)
        );
    }

    #[test]
    fn test_stats_written_and_read_back() {
        let harness = Harness::new();
        let mut writer = harness.writer(1, 2, Config::default());
        writer
            .append(partition(
                "a",
                vec![Cell::live("col", "v", 100), Cell::live("col2", "w", 200)],
            ))
            .unwrap();
        writer.append(tiny_partition("b")).unwrap();
        writer.finish(false).unwrap();

        let bytes =
            std::fs::read(harness.descriptor(1).filename_for(Component::Statistics)).unwrap();
        let stats_file = StatsFile::decode(&bytes).unwrap();
        assert_eq!(
            stats_file.validation.partitioner_name,
            "ByteOrderedPartitioner"
        );
        assert_eq!(stats_file.stats.min_timestamp, 1);
        assert_eq!(stats_file.stats.max_timestamp, 200);
        assert_eq!(stats_file.stats.total_cells, 3);
        assert_eq!(stats_file.stats.first_key, Some(b"a".to_vec()));
        assert_eq!(stats_file.stats.last_key, Some(b"b".to_vec()));
        assert_eq!(stats_file.compaction.estimated_key_count, 2);
        assert_eq!(stats_file.stats.partition_sizes.count(), 2);
        assert_eq!(stats_file.stats.cells_per_partition.count(), 2);
    }

    #[test]
    fn test_summary_samples_match_partition_keys() {
        let harness = Harness::new();
        let interval = 16;
        let config = Config::default().min_index_interval(interval);
        let n: usize = 100;
        let mut writer = harness.writer(1, n as u64, config);

        let keys: Vec<String> = (0..n).map(|i| format!("key_{i:05}")).collect();
        for key in &keys {
            writer.append(tiny_partition(key)).unwrap();
        }
        let reader = writer.finish(true).unwrap().unwrap();

        let summary = reader.summary();
        assert_eq!(summary.entry_count(), n.div_ceil(interval));
        for (i, (sample, _)) in summary.entries().iter().enumerate() {
            assert_eq!(sample.key(), keys[i * interval].as_bytes());
        }
    }
}
