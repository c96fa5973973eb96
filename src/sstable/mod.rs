//! SSTable construction: descriptors, component files, and the writers
//! that build them.
//!
//! An SSTable generation is a set of component files sharing one name stem:
//!
//! ```text
//! <keyspace>-<table>-<version>-<generation>-Data.db
//! <keyspace>-<table>-<version>-<generation>-Index.db
//! <keyspace>-<table>-<version>-<generation>-Summary.db
//! <keyspace>-<table>-<version>-<generation>-Filter.db
//! <keyspace>-<table>-<version>-<generation>-Statistics.db
//! <keyspace>-<table>-<version>-<generation>-CRC.db        (uncompressed)
//! <keyspace>-<table>-<version>-<generation>-CompressionInfo.db (compressed)
//! <keyspace>-<table>-<version>-<generation>-Digest.db     (optional)
//! <keyspace>-<table>-<version>-<generation>-TOC.txt
//! ```
//!
//! Files keep a temp suffix until the writer commits; the TOC lists the
//! component kinds present for the generation.

pub mod bloom;
pub mod entry;
pub mod index;
pub mod reader;
pub mod serializer;
pub mod stats;
pub mod summary;
pub mod writer;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::io::tmp_path;

/// On-disk format version. Versions are ordered by release ordinal, never
/// by the identifier's byte order; a new version must bump the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    id: &'static str,
    ordinal: u8,
}

impl Version {
    /// The last version hashing bloom filter keys in the legacy byte
    /// order.
    pub const LEGACY: Version = Version {
        id: "ba",
        ordinal: 0,
    };
    /// "ca" switched the bloom filter to the current hash byte order.
    pub const CURRENT: Version = Version {
        id: "ca",
        ordinal: 1,
    };

    pub fn as_str(&self) -> &'static str {
        self.id
    }

    pub fn has_legacy_bloom_hash_order(&self) -> bool {
        self.ordinal < Version::CURRENT.ordinal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal.cmp(&other.ordinal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The kinds of files an SSTable generation can comprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Data,
    PrimaryIndex,
    Summary,
    Filter,
    Statistics,
    CompressionInfo,
    Crc,
    Digest,
    Toc,
}

impl Component {
    pub const ALL: [Component; 9] = [
        Component::Data,
        Component::PrimaryIndex,
        Component::Summary,
        Component::Filter,
        Component::Statistics,
        Component::CompressionInfo,
        Component::Crc,
        Component::Digest,
        Component::Toc,
    ];

    /// The component's file name suffix, including its extension.
    pub fn file_name(&self) -> &'static str {
        match self {
            Component::Data => "Data.db",
            Component::PrimaryIndex => "Index.db",
            Component::Summary => "Summary.db",
            Component::Filter => "Filter.db",
            Component::Statistics => "Statistics.db",
            Component::CompressionInfo => "CompressionInfo.db",
            Component::Crc => "CRC.db",
            Component::Digest => "Digest.db",
            Component::Toc => "TOC.txt",
        }
    }

    pub fn parse(name: &str) -> Result<Component> {
        Component::ALL
            .into_iter()
            .find(|c| c.file_name() == name)
            .ok_or_else(|| Error::InvalidData(format!("unknown component {name:?}")))
    }

    /// The component set a build declares up front.
    pub fn for_build(compressed: bool, write_digest: bool) -> Vec<Component> {
        let mut components = vec![
            Component::Data,
            Component::PrimaryIndex,
            Component::Summary,
            Component::Filter,
            Component::Statistics,
            if compressed {
                Component::CompressionInfo
            } else {
                Component::Crc
            },
            Component::Toc,
        ];
        if write_digest {
            components.push(Component::Digest);
        }
        components
    }
}

/// Immutable identity of one SSTable generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub directory: PathBuf,
    pub keyspace: String,
    pub table: String,
    pub version: Version,
    pub generation: u64,
}

impl Descriptor {
    pub fn new(
        directory: impl Into<PathBuf>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            directory: directory.into(),
            keyspace: keyspace.into(),
            table: table.into(),
            version: Version::CURRENT,
            generation,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Final path of a component file.
    pub fn filename_for(&self, component: Component) -> PathBuf {
        self.directory.join(format!(
            "{}-{}-{}-{}-{}",
            self.keyspace,
            self.table,
            self.version.as_str(),
            self.generation,
            component.file_name()
        ))
    }

    /// Temp-suffixed path of a component file, used until commit.
    pub fn tmp_filename_for(&self, component: Component) -> PathBuf {
        tmp_path(&self.filename_for(component))
    }
}

/// Writes the table-of-contents listing under its temp name and fsyncs it;
/// the commit pipeline renames it into place as its final step.
pub fn write_toc(descriptor: &Descriptor, components: &[Component]) -> Result<()> {
    let path = descriptor.tmp_filename_for(Component::Toc);
    let mut file = File::create(&path).map_err(|e| Error::write(&path, e))?;
    for component in components {
        writeln!(file, "{}", component.file_name()).map_err(|e| Error::write(&path, e))?;
    }
    file.sync_all().map_err(|e| Error::write(&path, e))?;
    Ok(())
}

/// Reads a committed TOC back into its component list.
pub fn read_toc(descriptor: &Descriptor) -> Result<Vec<Component>> {
    let path = descriptor.filename_for(Component::Toc);
    let text = std::fs::read_to_string(&path).map_err(|e| Error::read(&path, e))?;
    text.lines()
        .filter(|line| !line.is_empty())
        .map(Component::parse)
        .collect()
}
