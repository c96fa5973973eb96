//! File plumbing shared by every SSTable component: the sequential sink,
//! checksum state, chunked compression, and reader-side segmented views.

pub mod checksum;
pub mod compression;
pub mod segmented;
pub mod sequential;

use std::path::{Path, PathBuf};

pub use segmented::{SegmentedFile, SegmentedFileBuilder};
pub use sequential::{sync_parent_dir, FileMark, PostFlushListener, SequentialWriter};

/// Suffix carried by every file until its writer commits.
pub const TMP_SUFFIX: &str = "-tmp";

/// The temp-name twin of a final path.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Whether a path still bears the temp suffix.
pub fn is_tmp_path(path: &Path) -> bool {
    path.as_os_str()
        .to_string_lossy()
        .ends_with(TMP_SUFFIX)
}
