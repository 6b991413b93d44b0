//! Point retrieval by primary key at a read timestamp.

use std::sync::Arc;

use crate::error::Result;
use crate::query::plan::Plan;
use crate::schema::{FieldOffset, Schema};
use crate::segment::column::FieldColumn;
use crate::segment::Segment;
use crate::Timestamp;

/// A retrieval plan: primary keys to look up and the fields to return.
#[derive(Debug, Clone)]
pub struct RetrievePlan {
    schema: Arc<Schema>,
    ids: Vec<i64>,
    target_fields: Vec<FieldOffset>,
}

impl RetrievePlan {
    pub fn new(schema: Arc<Schema>, ids: Vec<i64>, target_fields: &[&str]) -> Result<Self> {
        let target_fields = target_fields
            .iter()
            .map(|name| schema.offset_of_name(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema,
            ids,
            target_fields,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn target_fields(&self) -> &[FieldOffset] {
        &self.target_fields
    }
}

/// The retrieved rows: the resolved segment offsets (`-1` for ids that are
/// absent or deleted at the timestamp), the primary keys, and one gathered
/// column per requested field, aligned with `ids`.
#[derive(Debug, Clone)]
pub struct RetrieveResult {
    pub ids: Vec<i64>,
    pub offsets: Vec<i64>,
    pub columns: Vec<FieldColumn>,
}

/// Execute a retrieval plan against a segment at read timestamp `ts`.
///
/// For each id, the live row is the latest visible insert with that
/// primary key; absent slots gather as zeroed output.
pub fn retrieve(segment: &dyn Segment, plan: &RetrievePlan, ts: Timestamp) -> Result<RetrieveResult> {
    let offsets = segment.lookup_primary_keys(plan.ids(), ts)?;
    let ids = segment.fill_primary_keys(&offsets)?;
    let columns = plan
        .target_fields()
        .iter()
        .map(|&field| segment.bulk_subscript(field, &offsets))
        .collect::<Result<Vec<_>>>()?;

    Ok(RetrieveResult {
        ids,
        offsets,
        columns,
    })
}

/// Gather the primary keys for a search result's offsets, preserving `-1`
/// sentinel slots.
pub fn fill_primary_keys(
    segment: &dyn Segment,
    result: &crate::query::reduce::SearchResult,
) -> Result<Vec<i64>> {
    segment.fill_primary_keys(&result.seg_offsets)
}

/// Check that a plan's involved fields can be served; exposed for callers
/// that probe readiness without searching.
pub fn check_search(segment: &dyn Segment, plan: &Plan) -> Result<()> {
    segment.check_search(plan)
}
