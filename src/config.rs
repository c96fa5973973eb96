use crate::io::compression::Codec;

/// Configuration for SSTable construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sink buffer size; also the checksum chunk size for uncompressed
    /// tables (default: 64KB)
    pub buffer_size: usize,

    /// One summary sample per this many partitions (default: 128)
    pub min_index_interval: usize,

    /// Full sampling level the summary is built at (default: 128)
    pub base_sampling_level: usize,

    /// Bloom filter target false-positive chance (default: 0.01)
    pub bloom_fp_chance: f64,

    /// Target size of an in-partition column index block (default: 64KB)
    pub column_index_size: usize,

    /// Partitions whose encoded size exceeds this log a warning
    /// (default: 100MB)
    pub large_partition_threshold: u64,

    /// Data file compression; None writes the plain-CRC variant
    /// (default: None)
    pub compression: Option<CompressionParams>,

    /// Also emit a `Digest` file with the data stream's CRC
    /// (default: false)
    pub write_digest: bool,
}

/// Parameters for the compressed data-file variant.
#[derive(Debug, Clone)]
pub struct CompressionParams {
    /// Uncompressed bytes per compression chunk (default: 64KB)
    pub chunk_size: usize,

    /// Chunk codec (default: Snappy)
    pub codec: Codec,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            min_index_interval: 128,
            base_sampling_level: 128,
            bloom_fp_chance: 0.01,
            column_index_size: 64 * 1024,
            large_partition_threshold: 100 * 1024 * 1024,
            compression: None,
            write_digest: false,
        }
    }
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            codec: Codec::Snappy,
        }
    }
}

impl Config {
    /// Set the sink buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the summary sampling interval
    pub fn min_index_interval(mut self, interval: usize) -> Self {
        self.min_index_interval = interval;
        self
    }

    /// Set the base sampling level
    pub fn base_sampling_level(mut self, level: usize) -> Self {
        self.base_sampling_level = level;
        self
    }

    /// Set the bloom filter false-positive chance
    pub fn bloom_fp_chance(mut self, chance: f64) -> Self {
        self.bloom_fp_chance = chance;
        self
    }

    /// Set the column index block target size
    pub fn column_index_size(mut self, size: usize) -> Self {
        self.column_index_size = size;
        self
    }

    /// Set the large partition warning threshold
    pub fn large_partition_threshold(mut self, threshold: u64) -> Self {
        self.large_partition_threshold = threshold;
        self
    }

    /// Enable data file compression
    pub fn compression(mut self, params: CompressionParams) -> Self {
        self.compression = Some(params);
        self
    }

    /// Emit the `Digest` component
    pub fn write_digest(mut self, write: bool) -> Self {
        self.write_digest = write;
        self
    }
}
