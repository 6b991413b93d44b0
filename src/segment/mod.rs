//! Segments: the units that store rows and execute query plans.
//!
//! The two segment kinds share one query contract, the [`Segment`] trait;
//! the executor holds a reference to the capability set, never to a
//! concrete kind.

pub mod ack_responder;
pub mod column;
pub mod concurrent_vector;
pub mod deleted_record;
pub mod growing;
pub mod insert_record;
pub mod sealed;

pub use ack_responder::AckResponder;
pub use column::{ColumnData, FieldColumn, ScalarChunk, VectorChunk};
pub use concurrent_vector::{ChunkView, ConcurrentVector};
pub use deleted_record::{DeletedRecord, TmpBitmap};
pub use growing::GrowingSegment;
pub use insert_record::InsertRecord;
pub use sealed::SealedSegment;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bitmap::RowBitmap;
use crate::error::Result;
use crate::index::ScalarIndex;
use crate::query::placeholder::QueryVectors;
use crate::query::plan::{Plan, VectorQueryInfo};
use crate::query::sub_result::SubQueryResult;
use crate::schema::{FieldOffset, Schema};
use crate::Timestamp;

/// Metadata accompanying one loaded column batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadFieldMeta {
    pub min_timestamp: Timestamp,
    pub max_timestamp: Timestamp,
    pub row_count: i64,
}

/// Metadata accompanying a sealed-segment load: one entry per column
/// batch plus the total byte size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSegmentMeta {
    pub metas: Vec<LoadFieldMeta>,
    pub total_size: i64,
}

impl LoadSegmentMeta {
    /// The timestamp range covered by every batch.
    pub fn timestamp_range(&self) -> Option<(Timestamp, Timestamp)> {
        let min = self.metas.iter().map(|meta| meta.min_timestamp).min()?;
        let max = self.metas.iter().map(|meta| meta.max_timestamp).max()?;
        Some((min, max))
    }
}

/// The shared capability set of growing and sealed segments.
pub trait Segment: Send + Sync {
    fn schema(&self) -> &Arc<Schema>;

    /// Published row count.
    fn row_count(&self) -> i64;

    /// Approximate resident bytes.
    fn memory_usage(&self) -> usize;

    /// Rows per chunk; sealed segments are one chunk spanning everything.
    fn size_per_chunk(&self) -> usize;

    /// Rows visible to a query at `ts` (the insert barrier).
    fn visible_row_count(&self, ts: Timestamp) -> i64;

    /// Rows shadowed by deletes at `ts`, over `[0, row_count)`. Sealed
    /// segments have none.
    fn deleted_bitmap(&self, ts: Timestamp, row_count: i64) -> Result<RowBitmap>;

    /// Borrow one chunk of a scalar column for predicate scans.
    fn scalar_chunk(&self, field: FieldOffset, chunk_id: usize) -> Result<ScalarChunk>;

    /// The field's scalar index, where one was built at load.
    fn scalar_index(&self, field: FieldOffset) -> Option<Arc<ScalarIndex>>;

    /// Run the plan's vector sub-query under the combined allow-bitmap.
    /// Result offsets are segment row offsets.
    fn vector_search(
        &self,
        info: &VectorQueryInfo,
        queries: &QueryVectors,
        bitmap: &RowBitmap,
        row_count: i64,
    ) -> Result<SubQueryResult>;

    /// Whether this segment can serve every field the plan involves.
    fn check_search(&self, plan: &Plan) -> Result<()>;

    /// Random-access gather of one column; offset `-1` yields zeroed
    /// output.
    fn bulk_subscript(&self, field: FieldOffset, offsets: &[i64]) -> Result<FieldColumn>;

    /// Resolve primary keys to their live row offsets at `ts` (`-1` for
    /// absent or deleted keys).
    fn lookup_primary_keys(&self, ids: &[i64], ts: Timestamp) -> Result<Vec<i64>>;

    /// Gather the primary keys behind result offsets, preserving `-1`.
    fn fill_primary_keys(&self, offsets: &[i64]) -> Result<Vec<i64>>;
}
