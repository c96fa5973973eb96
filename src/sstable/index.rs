//! The index writer: primary index, summary, and bloom filter in lockstep.
//!
//! For every partition the table writer accepts, the index writer appends
//! one record to the primary index sink, adds the key to the bloom filter,
//! and offers the entry to the summary builder. Its prepare phase flushes
//! the filter before the index is closed, then persists the summary; its
//! state machine only moves forward:
//!
//! ```text
//! Open -> Preparing -> Prepared -> Committed
//!   \---------\----------\-------> Aborted
//! ```

use std::fs;
use std::path::Path;

use tracing::trace;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io::sequential::write_sidecar;
use crate::io::{tmp_path, FileMark, SegmentedFile, SegmentedFileBuilder, SequentialWriter};
use crate::key::DecoratedKey;
use crate::sstable::bloom::{BloomFilter, BloomHandle};
use crate::sstable::entry::{encode_index_record, RowIndexEntry};
use crate::sstable::summary::{
    IndexSummary, IndexSummaryBuilder, ReadableBoundary, SummaryFile, SummaryMark,
};
use crate::sstable::{Component, Descriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

pub struct IndexWriter {
    descriptor: Descriptor,
    components: Vec<Component>,
    index_file: SequentialWriter,
    summary: IndexSummaryBuilder,
    bloom: BloomHandle,
    builder: SegmentedFileBuilder,
    mark: Option<(FileMark, SummaryMark)>,
    phase: Phase,
}

impl IndexWriter {
    /// Opens the primary index sink and wires the fsync observers of both
    /// files into the summary's shared offsets.
    pub fn new(
        descriptor: Descriptor,
        components: Vec<Component>,
        config: &Config,
        expected_keys: u64,
        data_file: &mut SequentialWriter,
    ) -> Result<Self> {
        let index_file = SequentialWriter::open(
            descriptor.filename_for(Component::PrimaryIndex),
            config.buffer_size,
        )?;
        let summary = IndexSummaryBuilder::new(
            expected_keys,
            config.min_index_interval,
            config.base_sampling_level,
        );
        let bloom = BloomFilter::with_fp_chance(
            expected_keys,
            config.bloom_fp_chance,
            descriptor.version.has_legacy_bloom_hash_order(),
        );

        let mut writer = Self {
            descriptor,
            components,
            index_file,
            summary,
            bloom,
            builder: SegmentedFileBuilder::new(),
            mark: None,
            phase: Phase::Open,
        };

        let synced = writer.summary.synced_offsets();
        writer
            .index_file
            .set_post_flush_listener(Box::new(move |offset| synced.mark_index_synced(offset)));
        let synced = writer.summary.synced_offsets();
        data_file.set_post_flush_listener(Box::new(move |offset| synced.mark_data_synced(offset)));

        Ok(writer)
    }

    pub fn append(
        &mut self,
        key: &DecoratedKey,
        entry: &RowIndexEntry,
        data_end: u64,
    ) -> Result<()> {
        self.bloom.add(key.key());

        let index_start = self.index_file.file_pointer();
        let mut record = Vec::new();
        encode_index_record(key.key(), entry, &mut record);
        self.index_file.write(&record)?;
        let index_end = self.index_file.file_pointer();

        trace!(position = entry.position, index_start, "wrote index entry");

        self.builder.add_potential_boundary(index_start);
        self.summary
            .maybe_add_entry(key, index_start, index_end, data_end);
        Ok(())
    }

    /// The last key guaranteed fully durable in both index and data files.
    pub fn get_max_readable(&self) -> Option<ReadableBoundary> {
        self.summary.last_readable_boundary()
    }

    pub fn bloom(&self) -> &BloomHandle {
        &self.bloom
    }

    /// A shared snapshot handle for a reader.
    pub fn shared_bloom(&self) -> BloomHandle {
        BloomHandle::clone(&self.bloom)
    }

    pub fn build_summary(&self, boundary: Option<&ReadableBoundary>) -> IndexSummary {
        self.summary.build(boundary)
    }

    pub fn file_pointer(&self) -> u64 {
        self.index_file.file_pointer()
    }

    /// On-disk path of the index file (temp-named until commit).
    pub fn disk_path(&self) -> &Path {
        self.index_file.path()
    }

    /// A frozen index view up to `length`, for reader construction.
    pub fn build_index_view(&self, length: u64) -> Result<SegmentedFile> {
        self.builder.build(self.index_file.path(), length)
    }

    /// Fsyncs the index sink without closing it.
    pub fn sync(&mut self) -> Result<()> {
        self.index_file.sync()
    }

    pub fn mark(&mut self) -> Result<()> {
        let file_mark = self.index_file.mark()?;
        self.mark = Some((file_mark, self.summary.mark()));
        Ok(())
    }

    /// Rewinds the index to the mark and restores the summary's sampling
    /// counters. Keys already added to the bloom filter stay; extra
    /// entries only cost false positives.
    pub fn reset_and_truncate(&mut self) -> Result<()> {
        let (file_mark, summary_mark) = self
            .mark
            .as_ref()
            .ok_or_else(|| Error::InvalidState("reset without a mark".to_string()))?;
        let summary_mark = *summary_mark;
        let position = file_mark.position();
        self.index_file.reset_and_truncate(file_mark)?;
        self.summary.reset_to_mark(summary_mark);
        self.builder.truncate_to(position);
        Ok(())
    }

    /// Serializes the bloom filter to the `Filter` component and fsyncs
    /// it, before the index file closes.
    fn flush_filter(&self) -> Result<()> {
        if !self.components.contains(&Component::Filter) {
            return Ok(());
        }
        let path = self.descriptor.filename_for(Component::Filter);
        write_sidecar(&path, &self.bloom.serialize())
    }

    fn save_summary(
        &self,
        first_key: Option<Vec<u8>>,
        last_key: Option<Vec<u8>>,
        data_boundaries: Vec<u64>,
    ) -> Result<()> {
        let index_length = self.index_file.file_pointer();
        let file = SummaryFile {
            summary: self.summary.build(None),
            first_key,
            last_key,
            index_boundaries: self.builder.snapshot(index_length),
            data_boundaries,
        };
        let mut encoded = Vec::new();
        file.encode_into(&mut encoded);
        write_sidecar(&self.descriptor.filename_for(Component::Summary), &encoded)
    }

    /// Prepare phase: filter flushed first, then the index sink closed at
    /// its logical length, then the summary persisted.
    pub fn prepare_to_commit(
        &mut self,
        first_key: Option<Vec<u8>>,
        last_key: Option<Vec<u8>>,
        data_boundaries: Vec<u64>,
    ) -> Result<()> {
        match self.phase {
            Phase::Prepared | Phase::Committed => return Ok(()),
            Phase::Aborted => {
                return Err(Error::InvalidState(
                    "prepare on aborted index writer".to_string(),
                ))
            }
            Phase::Open | Phase::Preparing => {}
        }
        self.phase = Phase::Preparing;

        self.flush_filter()?;
        self.index_file.prepare_to_commit()?;
        self.save_summary(first_key, last_key, data_boundaries)?;

        self.phase = Phase::Prepared;
        Ok(())
    }

    /// Commit phase, accumulator style: filter, index, then summary are
    /// renamed into place; every step runs regardless of earlier
    /// failures.
    pub fn commit(&mut self, acc: Option<Error>) -> Option<Error> {
        if self.phase == Phase::Committed {
            return acc;
        }

        let mut own = None;
        if self.components.contains(&Component::Filter) {
            own = Error::accumulate(own, rename_component(&self.descriptor, Component::Filter));
        }
        own = Error::accumulate(own, self.index_file.commit());
        own = Error::accumulate(own, rename_component(&self.descriptor, Component::Summary));

        if own.is_none() {
            self.phase = Phase::Committed;
        }
        match own {
            None => acc,
            Some(err) => Error::accumulate(acc, Err(err)),
        }
    }

    /// Abort, accumulator style: deletes temp and final names for the
    /// index, filter, and summary.
    pub fn abort(&mut self, mut acc: Option<Error>) -> Option<Error> {
        if self.phase == Phase::Aborted {
            return acc;
        }
        self.phase = Phase::Aborted;

        if self.index_file.is_committed() {
            acc = Error::accumulate(acc, remove_both(&self.descriptor, Component::PrimaryIndex));
        } else {
            acc = Error::accumulate(acc, self.index_file.abort());
        }
        acc = Error::accumulate(acc, remove_both(&self.descriptor, Component::Filter));
        acc = Error::accumulate(acc, remove_both(&self.descriptor, Component::Summary));
        acc
    }
}

pub(crate) fn rename_component(descriptor: &Descriptor, component: Component) -> Result<()> {
    let from = descriptor.tmp_filename_for(component);
    let to = descriptor.filename_for(component);
    fs::rename(&from, &to).map_err(|e| Error::write(&to, e))
}

/// Removes both the temp and final names of a component, tolerating
/// absence.
pub(crate) fn remove_both(descriptor: &Descriptor, component: Component) -> Result<()> {
    let final_path = descriptor.filename_for(component);
    let mut acc = Error::accumulate(None, remove_if_present(&tmp_path(&final_path)));
    acc = Error::accumulate(acc, remove_if_present(&final_path));
    match acc {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::write(path, e)),
    }
}
