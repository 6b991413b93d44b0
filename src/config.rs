//! Segment configuration.

use serde::{Deserialize, Serialize};

/// Default number of rows per column chunk.
pub const DEFAULT_SIZE_PER_CHUNK: usize = 32 * 1024;

/// Configuration for the per-chunk index a growing segment builds over
/// completed vector chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmallIndexConfig {
    /// Whether to build per-chunk indexes at all.
    pub enabled: bool,
    /// Number of inverted lists for the per-chunk IVF index.
    pub nlist: usize,
    /// Number of lists probed at search time when the plan does not
    /// override it.
    pub nprobe: usize,
}

impl Default for SmallIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nlist: 100,
            nprobe: 4,
        }
    }
}

/// Configuration shared by all segments of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Rows per chunk in growing-segment columns.
    pub size_per_chunk: usize,
    /// Capacity of the deleted-bitmap LRU cache.
    pub deleted_bitmap_cache: usize,
    /// Per-chunk small-index parameters for growing segments.
    pub small_index: SmallIndexConfig,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            size_per_chunk: DEFAULT_SIZE_PER_CHUNK,
            deleted_bitmap_cache: 8,
            small_index: SmallIndexConfig::default(),
        }
    }
}

impl SegmentConfig {
    /// A configuration with a small chunk size, for tests that want to
    /// exercise multi-chunk paths with little data.
    pub fn with_size_per_chunk(size_per_chunk: usize) -> Self {
        Self {
            size_per_chunk,
            ..Default::default()
        }
    }
}
