//! The sealed segment: a single-chunk immutable store with optional
//! scalar and vector indexes.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use parking_lot::RwLock;

use crate::bitmap::RowBitmap;
use crate::error::{LodestoneError, Result};
use crate::index::{ScalarIndex, VectorIndex};
use crate::metric::MetricType;
use crate::query::brute_force::search_chunk_brute_force;
use crate::query::placeholder::QueryVectors;
use crate::query::plan::{Plan, VectorQueryInfo};
use crate::query::sub_result::SubQueryResult;
use crate::schema::{FieldId, FieldOffset, Schema};
use crate::segment::column::{FieldColumn, ScalarChunk};
use crate::segment::Segment;
use crate::Timestamp;

struct SealedVectorIndex {
    metric: MetricType,
    index: Arc<dyn VectorIndex>,
}

#[derive(Default)]
struct SealedState {
    row_count: Option<i64>,
    row_ids: Option<Arc<Vec<i64>>>,
    columns: Vec<Option<FieldColumn>>,
    scalar_indexes: Vec<Option<Arc<ScalarIndex>>>,
    vector_indexes: Vec<Option<SealedVectorIndex>>,
    field_data_ready: Vec<bool>,
    vecindex_ready: Vec<bool>,
    /// Timestamp range of the loaded rows, when the loader reported one.
    timestamp_range: Option<(Timestamp, Timestamp)>,
}

/// An immutable segment populated column by column.
///
/// Every load asserts row-count agreement with what is already present;
/// queries hold the shared lock for their duration, so a `drop_*` call
/// returns only after in-flight queries finish.
pub struct SealedSegment {
    schema: Arc<Schema>,
    state: RwLock<SealedState>,
}

impl SealedSegment {
    pub fn new(schema: Arc<Schema>) -> Self {
        let fields = schema.len();
        let state = SealedState {
            columns: (0..fields).map(|_| None).collect(),
            scalar_indexes: (0..fields).map(|_| None).collect(),
            vector_indexes: (0..fields).map(|_| None).collect(),
            field_data_ready: vec![false; fields],
            vecindex_ready: vec![false; fields],
            ..Default::default()
        };
        Self {
            schema,
            state: RwLock::new(state),
        }
    }

    /// Record the load metadata the loader reported; the timestamp range
    /// sharpens visibility answers for low read timestamps.
    pub fn set_load_meta(&self, meta: &crate::segment::LoadSegmentMeta) {
        let mut state = self.state.write();
        state.timestamp_range = meta.timestamp_range();
    }

    /// Load one column from its little-endian blob. The system field
    /// [`FieldId::ROW_ID`] loads the row-id column; scalar user fields
    /// also get a scalar index built from the blob.
    pub fn load_field_data(&self, field_id: FieldId, row_count: i64, blob: &[u8]) -> Result<()> {
        if row_count <= 0 {
            return Err(LodestoneError::segment(
                "load_field_data needs a positive row count",
            ));
        }
        if field_id == FieldId::ROW_ID {
            let expected = row_count as usize * 8;
            if blob.len() != expected {
                return Err(LodestoneError::segment(format!(
                    "row-id blob is {} bytes, expected {expected}",
                    blob.len()
                )));
            }
            let mut ids = vec![0i64; row_count as usize];
            LittleEndian::read_i64_into(blob, &mut ids);
            return self.install_row_ids(ids);
        }
        if field_id.is_system() {
            return Err(LodestoneError::segment(format!(
                "unknown system field id {}",
                field_id.0
            )));
        }

        let offset = self.schema.offset_of_id(field_id)?;
        let meta = self.schema.field(offset);
        let column = FieldColumn::from_blob(meta, row_count as usize, blob)?;
        self.install_column(offset, column)
    }

    /// Install the row-id system column.
    pub(crate) fn install_row_ids(&self, ids: Vec<i64>) -> Result<()> {
        let mut state = self.state.write();
        update_row_count(&mut state, ids.len() as i64)?;
        if state.row_ids.is_some() {
            return Err(LodestoneError::segment("row ids already loaded"));
        }
        debug!("loaded {} row ids", ids.len());
        state.row_ids = Some(Arc::new(ids));
        Ok(())
    }

    /// Install an already-decoded column; scalar fields get their index
    /// built here.
    pub(crate) fn install_column(&self, offset: FieldOffset, column: FieldColumn) -> Result<()> {
        let meta = self.schema.field(offset);
        let scalar_index = if meta.is_vector() {
            None
        } else {
            Some(Arc::new(ScalarIndex::build(
                &column.scalar_chunk()?,
                column.row_count(),
            )))
        };

        let mut state = self.state.write();
        update_row_count(&mut state, column.row_count() as i64)?;
        if state.field_data_ready[offset.0] {
            return Err(LodestoneError::segment(format!(
                "field '{}' data already exists",
                meta.name
            )));
        }
        if meta.is_vector() && state.vecindex_ready[offset.0] {
            return Err(LodestoneError::segment(format!(
                "field '{}' data can't be loaded when an index exists",
                meta.name
            )));
        }
        debug!("loaded field '{}' ({} rows)", meta.name, column.row_count());
        state.columns[offset.0] = Some(column);
        state.scalar_indexes[offset.0] = scalar_index;
        state.field_data_ready[offset.0] = true;
        Ok(())
    }

    /// Attach a pre-built vector index for a vector field. The index's row
    /// count must agree with every loaded column.
    pub fn load_vector_index(
        &self,
        field_id: FieldId,
        metric: MetricType,
        index: Arc<dyn VectorIndex>,
    ) -> Result<()> {
        let offset = self.schema.offset_of_id(field_id)?;
        let meta = self.schema.field(offset);
        if !meta.is_vector() {
            return Err(LodestoneError::segment(format!(
                "cannot attach a vector index to scalar field '{}'",
                meta.name
            )));
        }
        if index.metric() != metric {
            return Err(LodestoneError::Index(format!(
                "index was built for {}, not {}",
                index.metric().name(),
                metric.name()
            )));
        }
        let index_rows = index.row_count();
        if index_rows <= 0 {
            return Err(LodestoneError::index("attached index is empty"));
        }

        let mut state = self.state.write();
        if state.vecindex_ready[offset.0] {
            return Err(LodestoneError::segment(format!(
                "field '{}' already has an index",
                meta.name
            )));
        }
        if let Some(existing) = state.row_count {
            if existing != index_rows {
                return Err(LodestoneError::Index(format!(
                    "index reports {index_rows} rows but loaded columns have {existing}"
                )));
            }
        } else {
            state.row_count = Some(index_rows);
        }
        debug!(
            "attached {} index to field '{}' ({index_rows} rows)",
            metric.name(),
            meta.name
        );
        state.vector_indexes[offset.0] = Some(SealedVectorIndex { metric, index });
        state.vecindex_ready[offset.0] = true;
        Ok(())
    }

    /// Drop one loaded column (and its scalar index). In-flight queries
    /// finish first.
    pub fn drop_field_data(&self, field_id: FieldId) -> Result<()> {
        if field_id == FieldId::ROW_ID {
            let mut state = self.state.write();
            let dropped = state.row_ids.take();
            drop(state);
            drop(dropped);
            debug!("dropped row ids");
            return Ok(());
        }
        let offset = self.schema.offset_of_id(field_id)?;

        let mut state = self.state.write();
        state.field_data_ready[offset.0] = false;
        let column = state.columns[offset.0].take();
        let index = state.scalar_indexes[offset.0].take();
        drop(state);
        drop(column);
        drop(index);
        debug!("dropped field '{}' data", self.schema.field(offset).name);
        Ok(())
    }

    /// Drop the attached vector index of a field.
    pub fn drop_vector_index(&self, field_id: FieldId) -> Result<()> {
        let offset = self.schema.offset_of_id(field_id)?;
        if !self.schema.field(offset).is_vector() {
            return Err(LodestoneError::segment(format!(
                "field '{}' has no vector index to drop",
                self.schema.field(offset).name
            )));
        }

        let mut state = self.state.write();
        state.vecindex_ready[offset.0] = false;
        let index = state.vector_indexes[offset.0].take();
        drop(state);
        drop(index);
        debug!("dropped field index");
        Ok(())
    }

    /// Whether a field's raw column is loaded.
    pub fn has_field_data(&self, field_id: FieldId) -> Result<bool> {
        if field_id == FieldId::ROW_ID {
            return Ok(self.state.read().row_ids.is_some());
        }
        let offset = self.schema.offset_of_id(field_id)?;
        Ok(self.state.read().field_data_ready[offset.0])
    }

    /// Whether a field has an attached vector index.
    pub fn has_vector_index(&self, field_id: FieldId) -> Result<bool> {
        let offset = self.schema.offset_of_id(field_id)?;
        Ok(self.state.read().vecindex_ready[offset.0])
    }

    /// Sealed segments take no deletes; the surrounding system routes
    /// deletes to the segment's growing successor.
    pub fn pre_delete(&self, _n: i64) -> Result<i64> {
        Err(LodestoneError::invalid_operation(
            "sealed segments do not accept deletes",
        ))
    }

    /// See [`pre_delete`](SealedSegment::pre_delete).
    pub fn delete(&self, _begin: i64, _uids: &[i64], _timestamps: &[Timestamp]) -> Result<()> {
        Err(LodestoneError::invalid_operation(
            "sealed segments do not accept deletes",
        ))
    }
}

fn update_row_count(state: &mut SealedState, row_count: i64) -> Result<()> {
    match state.row_count {
        None => {
            state.row_count = Some(row_count);
            Ok(())
        }
        Some(existing) if existing == row_count => Ok(()),
        Some(existing) => Err(LodestoneError::segment(format!(
            "load has {row_count} rows but other columns have {existing}"
        ))),
    }
}

impl Segment for SealedSegment {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn row_count(&self) -> i64 {
        self.state.read().row_count.unwrap_or(0)
    }

    fn memory_usage(&self) -> usize {
        let state = self.state.read();
        let rows = state.row_count.unwrap_or(0) as usize;
        let row_ids = state.row_ids.as_ref().map_or(0, |ids| ids.len() * 8);
        rows * self.schema.total_sizeof() + row_ids
    }

    fn size_per_chunk(&self) -> usize {
        // One chunk spanning the whole segment.
        self.row_count().max(1) as usize
    }

    fn visible_row_count(&self, ts: Timestamp) -> i64 {
        // Sealed rows carry no per-row timestamps; the load metadata's
        // range is the only bound. A read at or below the minimum insert
        // timestamp predates every row (timestamp zero always does).
        let state = self.state.read();
        let min_timestamp = state.timestamp_range.map_or(0, |(min, _)| min);
        if ts <= min_timestamp {
            0
        } else {
            state.row_count.unwrap_or(0)
        }
    }

    fn deleted_bitmap(&self, _ts: Timestamp, row_count: i64) -> Result<RowBitmap> {
        Ok(RowBitmap::empty(row_count as u32))
    }

    fn scalar_chunk(&self, field: FieldOffset, _chunk_id: usize) -> Result<ScalarChunk> {
        let state = self.state.read();
        let column = state.columns[field.0].as_ref().ok_or_else(|| {
            LodestoneError::segment(format!(
                "field '{}' data is not loaded",
                self.schema.field(field).name
            ))
        })?;
        column.scalar_chunk()
    }

    fn scalar_index(&self, field: FieldOffset) -> Option<Arc<ScalarIndex>> {
        self.state.read().scalar_indexes[field.0].clone()
    }

    fn vector_search(
        &self,
        info: &VectorQueryInfo,
        queries: &QueryVectors,
        bitmap: &RowBitmap,
        row_count: i64,
    ) -> Result<SubQueryResult> {
        let state = self.state.read();
        let meta = self.schema.field(info.field);

        if state.vecindex_ready[info.field.0] {
            let attached = state.vector_indexes[info.field.0].as_ref().ok_or_else(|| {
                LodestoneError::segment(format!("field '{}' index slot is empty", meta.name))
            })?;
            if attached.metric != info.metric {
                return Err(LodestoneError::query(format!(
                    "plan metric {} does not match the {} index on field '{}'",
                    info.metric.name(),
                    attached.metric.name(),
                    meta.name
                )));
            }
            attached
                .index
                .search(queries, info.topk, &info.search_params, Some(bitmap))
        } else if state.field_data_ready[info.field.0] {
            let column = state.columns[info.field.0].as_ref().ok_or_else(|| {
                LodestoneError::segment(format!("field '{}' column slot is empty", meta.name))
            })?;
            search_chunk_brute_force(
                info.metric,
                queries,
                &column.vector_chunk()?,
                row_count as usize,
                info.topk,
                Some(bitmap),
            )
        } else {
            Err(LodestoneError::segment(format!(
                "field '{}' data is not loaded",
                meta.name
            )))
        }
    }

    fn check_search(&self, plan: &Plan) -> Result<()> {
        let state = self.state.read();
        if state.row_ids.is_none() {
            return Err(LodestoneError::segment(
                "system field RowId is not loaded",
            ));
        }
        for &field in plan.involved_fields() {
            if !state.field_data_ready[field.0] && !state.vecindex_ready[field.0] {
                return Err(LodestoneError::segment(format!(
                    "field '{}' is not loaded",
                    self.schema.field(field).name
                )));
            }
        }
        Ok(())
    }

    fn bulk_subscript(&self, field: FieldOffset, offsets: &[i64]) -> Result<FieldColumn> {
        let state = self.state.read();
        let column = state.columns[field.0].as_ref().ok_or_else(|| {
            LodestoneError::segment(format!(
                "field '{}' data is not loaded",
                self.schema.field(field).name
            ))
        })?;
        Ok(column.gather(offsets))
    }

    fn lookup_primary_keys(&self, ids: &[i64], ts: Timestamp) -> Result<Vec<i64>> {
        if self.visible_row_count(ts) == 0 {
            return Ok(vec![-1; ids.len()]);
        }
        let pk_offset = self.schema.primary_key_offset().ok_or_else(|| {
            LodestoneError::invalid_operation("schema declares no primary key")
        })?;
        let index = self.scalar_index(pk_offset).ok_or_else(|| {
            LodestoneError::segment("primary key column is not loaded")
        })?;

        Ok(ids
            .iter()
            .map(|&id| index.max_offset_eq_int(id).map_or(-1, i64::from))
            .collect())
    }

    fn fill_primary_keys(&self, offsets: &[i64]) -> Result<Vec<i64>> {
        let state = self.state.read();
        let keys: &[i64] = if let Some(pk_offset) = self.schema.primary_key_offset() {
            match state.columns[pk_offset.0].as_ref().and_then(FieldColumn::as_int64) {
                Some(keys) => keys,
                None => state
                    .row_ids
                    .as_deref()
                    .map(Vec::as_slice)
                    .ok_or_else(|| {
                        LodestoneError::segment("neither primary keys nor row ids are loaded")
                    })?,
            }
        } else {
            state.row_ids.as_deref().map(Vec::as_slice).ok_or_else(|| {
                LodestoneError::segment("row ids are not loaded")
            })?
        };

        Ok(offsets
            .iter()
            .map(|&offset| if offset < 0 { -1 } else { keys[offset as usize] })
            .collect())
    }
}
