//! # Lodestone
//!
//! The segment core of a vector search engine: the in-process library
//! that stores a bounded set of rows (vectors plus scalar columns) and
//! answers filtered approximate-nearest-neighbor and retrieval queries
//! over them under concurrent insertion and deletion.
//!
//! ## Features
//!
//! - Dual segment model: append-only growing segments and immutable
//!   sealed segments behind one query contract
//! - Concurrent columnar store with MVCC visibility: chunked append-only
//!   columns, an acknowledgement ridge publishing rows atomically, and
//!   per-timestamp delete visibility bitmaps
//! - A schema-bound query plan IR (boolean predicate tree plus one vector
//!   sub-query) with a JSON DSL
//! - Brute-force and index-backed kNN with deterministic top-K reduction

pub mod bitmap;
pub mod config;
pub mod error;
pub mod index;
pub mod metric;
pub mod query;
pub mod schema;
pub mod segment;

pub use bitmap::RowBitmap;
pub use config::SegmentConfig;
pub use error::{LodestoneError, Result};
pub use metric::MetricType;

/// Unsigned 64-bit operation timestamp, monotone per segment.
pub type Timestamp = u64;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
