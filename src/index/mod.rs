//! Index capability interfaces and reference implementations.
//!
//! The ANN indexes attached to sealed segments are external to this
//! library; [`VectorIndex`] is the capability they must satisfy. The
//! in-crate [`FlatIndex`] (exact) and [`IvfIndex`] (nlist/nprobe) exist as
//! reference implementations: tests attach them, and growing segments use
//! the IVF variant for their per-chunk small indexes. [`ScalarIndex`] is
//! the sorted lookup structure sealed segments build over scalar columns.

pub mod flat;
pub mod ivf;
pub mod scalar;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;
pub use scalar::ScalarIndex;

use crate::bitmap::RowBitmap;
use crate::error::Result;
use crate::metric::MetricType;
use crate::query::placeholder::QueryVectors;
use crate::query::sub_result::SubQueryResult;

/// Capability interface of an attached vector index.
pub trait VectorIndex: Send + Sync {
    /// Number of rows the index was built over.
    fn row_count(&self) -> i64;

    /// The metric the index was built for.
    fn metric(&self) -> MetricType;

    /// Top-K search. `bitmap`, when present, is the allow-list over the
    /// index's row offsets; the result carries those same offsets.
    fn search(
        &self,
        queries: &QueryVectors,
        topk: usize,
        params: &serde_json::Value,
        bitmap: Option<&RowBitmap>,
    ) -> Result<SubQueryResult>;
}
