//! The growing segment: append-only, unindexed (apart from per-chunk
//! small indexes), MVCC-visible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::bitmap::RowBitmap;
use crate::config::SegmentConfig;
use crate::error::{LodestoneError, Result};
use crate::index::{IvfIndex, ScalarIndex, VectorIndex};
use crate::metric::MetricType;
use crate::query::brute_force::search_chunk_brute_force;
use crate::query::placeholder::QueryVectors;
use crate::query::plan::{Plan, VectorQueryInfo};
use crate::query::sub_result::SubQueryResult;
use crate::schema::{DataType, FieldOffset, Schema};
use crate::segment::column::{FieldColumn, ScalarChunk};
use crate::segment::deleted_record::{DeletedRecord, TmpBitmap};
use crate::segment::insert_record::InsertRecord;
use crate::segment::sealed::SealedSegment;
use crate::segment::Segment;
use crate::Timestamp;

/// Chunk counts above this search in parallel.
const PARALLEL_CHUNK_THRESHOLD: usize = 4;

/// A mutable segment accepting concurrent inserts and deletes while
/// serving queries.
///
/// Writers follow the reserve/fill/ack protocol: [`pre_insert`] hands out
/// a slot range, [`insert`] fills and publishes it. Queries at timestamp
/// `T_r` see exactly the published rows with `ts < T_r`, minus the rows
/// shadowed by published deletes with `ts < T_r`.
///
/// [`pre_insert`]: GrowingSegment::pre_insert
/// [`insert`]: GrowingSegment::insert
pub struct GrowingSegment {
    schema: Arc<Schema>,
    config: SegmentConfig,
    record: InsertRecord,
    deleted: DeletedRecord,
    /// Primary key to every insert offset carrying it. Concurrent batches
    /// publish out of order, so the lists are unordered; lookups take the
    /// max.
    uid_offsets: Mutex<AHashMap<i64, Vec<i64>>>,
    /// Per field, per completed chunk: the small IVF index, if built.
    small_indexes: RwLock<Vec<Vec<Option<Arc<IvfIndex>>>>>,
    closed: AtomicBool,
}

impl GrowingSegment {
    pub fn new(schema: Arc<Schema>, config: SegmentConfig) -> Self {
        let record = InsertRecord::new(&schema, config.size_per_chunk);
        let deleted = DeletedRecord::new(config.size_per_chunk, config.deleted_bitmap_cache);
        let small_indexes = RwLock::new(vec![Vec::new(); schema.len()]);
        Self {
            schema,
            config,
            record,
            deleted,
            uid_offsets: Mutex::new(AHashMap::new()),
            small_indexes,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LodestoneError::invalid_operation(
                "segment has been sealed and no longer accepts writes",
            ));
        }
        Ok(())
    }

    /// Reserve `n` insert slots; returns the first offset of the range.
    pub fn pre_insert(&self, n: i64) -> Result<i64> {
        self.ensure_open()?;
        debug_assert!(n >= 0);
        Ok(self.record.reserved.fetch_add(n, Ordering::AcqRel))
    }

    /// Fill and publish a reserved insert range.
    ///
    /// The batch may arrive out of timestamp order; it is sorted by
    /// `(timestamp, uid, arrival)` before the copy so that the published
    /// prefix stays timestamp-ordered. `row_blob` is row-major with stride
    /// `Schema::total_sizeof()`.
    pub fn insert(
        &self,
        begin: i64,
        uids: &[i64],
        timestamps: &[Timestamp],
        row_blob: &[u8],
    ) -> Result<()> {
        self.ensure_open()?;
        let n = uids.len();
        if timestamps.len() != n {
            return Err(LodestoneError::segment(format!(
                "insert batch has {n} uids but {} timestamps",
                timestamps.len()
            )));
        }
        let stride = self.schema.total_sizeof();
        if row_blob.len() != n * stride {
            return Err(LodestoneError::segment(format!(
                "row blob is {} bytes, expected {} rows of stride {stride}",
                row_blob.len(),
                n
            )));
        }
        if n == 0 {
            self.record.ack_responder.add_segment(begin, begin);
            return Ok(());
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (timestamps[i], uids[i], i));

        let sorted_timestamps: Vec<Timestamp> = order.iter().map(|&i| timestamps[i]).collect();
        let sorted_uids: Vec<i64> = order.iter().map(|&i| uids[i]).collect();
        let rows: Vec<&[u8]> = order
            .iter()
            .map(|&i| &row_blob[i * stride..(i + 1) * stride])
            .collect();

        let row_begin = begin as usize;
        self.record.timestamps.set_data(row_begin, &sorted_timestamps);
        self.record.uids.set_data(row_begin, &sorted_uids);
        for position in 0..self.schema.len() {
            let field = FieldOffset(position);
            self.record
                .column(field)
                .set_rows(row_begin, &rows, self.schema.byte_offset(field));
        }

        {
            let mut map = self.uid_offsets.lock();
            for (i, &uid) in sorted_uids.iter().enumerate() {
                map.entry(uid).or_default().push(begin + i as i64);
            }
        }

        self.record.ack_responder.add_segment(begin, begin + n as i64);
        self.maybe_build_small_indexes();
        Ok(())
    }

    /// Reserve `n` delete slots; returns the first offset of the range.
    pub fn pre_delete(&self, n: i64) -> Result<i64> {
        self.ensure_open()?;
        debug_assert!(n >= 0);
        Ok(self.deleted.reserved.fetch_add(n, Ordering::AcqRel))
    }

    /// Fill and publish a reserved delete range. Each entry tombstones the
    /// latest row carrying that primary key at the delete's timestamp.
    pub fn delete(&self, begin: i64, uids: &[i64], timestamps: &[Timestamp]) -> Result<()> {
        self.ensure_open()?;
        let n = uids.len();
        if timestamps.len() != n {
            return Err(LodestoneError::segment(format!(
                "delete batch has {n} uids but {} timestamps",
                timestamps.len()
            )));
        }
        if n == 0 {
            self.deleted.ack_responder.add_segment(begin, begin);
            return Ok(());
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (timestamps[i], uids[i], i));
        let sorted_timestamps: Vec<Timestamp> = order.iter().map(|&i| timestamps[i]).collect();
        let sorted_uids: Vec<i64> = order.iter().map(|&i| uids[i]).collect();

        let row_begin = begin as usize;
        self.deleted.timestamps.set_data(row_begin, &sorted_timestamps);
        self.deleted.uids.set_data(row_begin, &sorted_uids);
        self.deleted.ack_responder.add_segment(begin, begin + n as i64);
        Ok(())
    }

    /// Published insert count with `ts < T_r`.
    pub fn ins_barrier(&self, ts: Timestamp) -> i64 {
        self.record.ts_barrier(ts)
    }

    /// Published delete count with `ts < T_r`.
    pub fn del_barrier(&self, ts: Timestamp) -> i64 {
        self.deleted.ts_barrier(ts)
    }

    /// The visibility bitmap for the first `del_barrier` deletes over the
    /// insert domain `[0, insert_barrier)`, served from the LRU cache and
    /// updated incrementally from the nearest cached entry.
    pub fn get_deleted_bitmap(
        &self,
        del_barrier: i64,
        query_ts: Timestamp,
        insert_barrier: i64,
    ) -> Arc<TmpBitmap> {
        if del_barrier <= 0 || insert_barrier <= 0 {
            return Arc::new(TmpBitmap::empty(insert_barrier.max(0)));
        }
        if let Some(hit) = self.deleted.cache_get(del_barrier, insert_barrier) {
            return hit;
        }

        let base = self
            .deleted
            .cache_nearest(del_barrier, insert_barrier)
            .unwrap_or_else(|| Arc::new(TmpBitmap::empty(insert_barrier)));
        let mut bits = base.deleted.clone();

        if base.del_barrier <= del_barrier {
            for del_index in base.del_barrier..del_barrier {
                if let Some(target) = self.shadow_target(del_index, query_ts, insert_barrier) {
                    bits.set(target as u32);
                }
            }
        } else {
            for del_index in del_barrier..base.del_barrier {
                if let Some(target) = self.shadow_target(del_index, query_ts, insert_barrier) {
                    bits.clear(target as u32);
                }
            }
        }

        let entry = Arc::new(TmpBitmap {
            del_barrier,
            insert_barrier,
            deleted: bits,
        });
        self.deleted.cache_insert(Arc::clone(&entry));
        entry
    }

    /// The insert offset shadowed by the `del_index`-th delete: the
    /// greatest offset carrying the deleted primary key whose timestamp
    /// precedes the delete's own timestamp. A later re-insert of the same
    /// key is deliberately out of reach of the delete.
    fn shadow_target(
        &self,
        del_index: i64,
        query_ts: Timestamp,
        insert_barrier: i64,
    ) -> Option<i64> {
        let uid = self.deleted.uids.get(del_index as usize);
        let delete_ts = self.deleted.timestamps.get(del_index as usize).min(query_ts);
        let map = self.uid_offsets.lock();
        map.get(&uid)?
            .iter()
            .copied()
            .filter(|&offset| {
                offset < insert_barrier
                    && self.record.timestamps.get(offset as usize) < delete_ts
            })
            .max()
    }

    /// Build small IVF indexes over any float-vector chunks that became
    /// fully published. Failures degrade to brute force.
    fn maybe_build_small_indexes(&self) {
        if !self.config.small_index.enabled {
            return;
        }
        let size_per_chunk = self.config.size_per_chunk;
        let full_chunks = self.record.ack() as usize / size_per_chunk;
        if full_chunks == 0 {
            return;
        }

        let mut to_build: Vec<(usize, usize)> = Vec::new();
        {
            let indexes = self.small_indexes.read();
            for (position, field) in self.schema.fields().iter().enumerate() {
                if !matches!(field.data_type, DataType::FloatVector { .. }) {
                    continue;
                }
                for chunk_id in 0..full_chunks {
                    if indexes[position].get(chunk_id).map_or(true, Option::is_none) {
                        to_build.push((position, chunk_id));
                    }
                }
            }
        }

        for (position, chunk_id) in to_build {
            let field = FieldOffset(position);
            let dim = match self.schema.field(field).data_type.dim() {
                Some(dim) => dim,
                None => continue,
            };
            let chunk = match self.record.column(field).vector_chunk(chunk_id) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };
            let data = match &chunk {
                crate::segment::column::VectorChunk::Float { data, .. } => {
                    data[..size_per_chunk * dim].to_vec()
                }
                _ => continue,
            };
            match IvfIndex::train(
                MetricType::L2,
                dim,
                data,
                self.config.small_index.nlist,
                self.config.small_index.nprobe,
            ) {
                Ok(index) => {
                    let mut indexes = self.small_indexes.write();
                    let slots = &mut indexes[position];
                    if slots.len() <= chunk_id {
                        slots.resize(chunk_id + 1, None);
                    }
                    if slots[chunk_id].is_none() {
                        debug!(
                            "built small index for field {} chunk {chunk_id}",
                            self.schema.field(field).name
                        );
                        slots[chunk_id] = Some(Arc::new(index));
                    }
                }
                Err(error) => {
                    warn!(
                        "small index build failed for field {} chunk {chunk_id}: {error}",
                        self.schema.field(field).name
                    );
                }
            }
        }
    }

    /// Freeze into a sealed segment.
    ///
    /// Every reserved insert and delete slot must have been published; the
    /// caller quiesces writers first. Rows tombstoned by published deletes
    /// are compacted away, the segment is closed, and the copied columns
    /// (primary keys doubling as row ids) are handed to a fresh
    /// [`SealedSegment`].
    pub fn seal(&self) -> Result<SealedSegment> {
        // Close the gate first so no new slot can be reserved while the
        // quiescence checks run; reopen if they fail.
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(LodestoneError::invalid_operation(
                "segment has already been sealed",
            ));
        }
        let reserved = self.record.reserved.load(Ordering::Acquire);
        let acked = self.record.ack();
        if reserved != acked {
            self.closed.store(false, Ordering::Release);
            return Err(LodestoneError::invalid_operation(format!(
                "cannot seal with outstanding insert slots ({acked} of {reserved} published)"
            )));
        }
        let deletes_reserved = self.deleted.reserved.load(Ordering::Acquire);
        let deletes_acked = self.deleted.ack();
        if deletes_reserved != deletes_acked {
            self.closed.store(false, Ordering::Release);
            return Err(LodestoneError::invalid_operation(format!(
                "cannot seal with outstanding delete slots ({deletes_acked} of {deletes_reserved} published)"
            )));
        }

        let tombstones = self.get_deleted_bitmap(deletes_acked, Timestamp::MAX, acked);
        let offsets: Vec<i64> = (0..acked)
            .filter(|&offset| !tombstones.deleted.contains(offset as u32))
            .collect();

        let sealed = SealedSegment::new(Arc::clone(&self.schema));
        let row_ids: Vec<i64> = offsets
            .iter()
            .map(|&offset| self.record.uids.get(offset as usize))
            .collect();
        sealed.install_row_ids(row_ids)?;
        for position in 0..self.schema.len() {
            let field = FieldOffset(position);
            let column = self.record.column(field).gather(&offsets);
            sealed.install_column(field, column)?;
        }

        info!(
            "sealed growing segment: {} of {acked} rows survive compaction",
            offsets.len()
        );
        Ok(sealed)
    }
}

impl Segment for GrowingSegment {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn row_count(&self) -> i64 {
        self.record.ack()
    }

    fn memory_usage(&self) -> usize {
        let rows = self.record.ack() as usize;
        rows * (self.schema.total_sizeof() + 16)
    }

    fn size_per_chunk(&self) -> usize {
        self.config.size_per_chunk
    }

    fn visible_row_count(&self, ts: Timestamp) -> i64 {
        self.record.ts_barrier(ts)
    }

    fn deleted_bitmap(&self, ts: Timestamp, row_count: i64) -> Result<RowBitmap> {
        let del_barrier = self.deleted.ts_barrier(ts);
        Ok(self
            .get_deleted_bitmap(del_barrier, ts, row_count)
            .deleted
            .resized(row_count as u32))
    }

    fn scalar_chunk(&self, field: FieldOffset, chunk_id: usize) -> Result<ScalarChunk> {
        self.record.column(field).scalar_chunk(chunk_id)
    }

    fn scalar_index(&self, _field: FieldOffset) -> Option<Arc<ScalarIndex>> {
        None
    }

    fn vector_search(
        &self,
        info: &VectorQueryInfo,
        queries: &QueryVectors,
        bitmap: &RowBitmap,
        row_count: i64,
    ) -> Result<SubQueryResult> {
        use rayon::prelude::*;

        let topk = info.topk;
        let metric = info.metric;
        let size_per_chunk = self.config.size_per_chunk;
        let total = row_count as usize;
        let num_chunks = total.div_ceil(size_per_chunk);

        let chunk_indexes: Vec<Option<Arc<IvfIndex>>> = {
            let indexes = self.small_indexes.read();
            (0..num_chunks)
                .map(|chunk_id| indexes[info.field.0].get(chunk_id).cloned().flatten())
                .collect()
        };

        let search_one = |chunk_id: usize| -> Result<SubQueryResult> {
            let base = chunk_id * size_per_chunk;
            let rows_here = size_per_chunk.min(total - base);
            let local_bitmap = bitmap.slice(base as u32, rows_here as u32);

            let indexed = chunk_indexes[chunk_id]
                .as_ref()
                .filter(|index| rows_here == size_per_chunk && index.metric() == metric);
            let mut partial = match indexed {
                Some(index) => {
                    index.search(queries, topk, &info.search_params, Some(&local_bitmap))?
                }
                None => {
                    let chunk = self.record.column(info.field).vector_chunk(chunk_id)?;
                    search_chunk_brute_force(
                        metric,
                        queries,
                        &chunk,
                        rows_here,
                        topk,
                        Some(&local_bitmap),
                    )?
                }
            };
            partial.rebase_offsets(base as i64);
            Ok(partial)
        };

        let partials: Vec<Result<SubQueryResult>> = if num_chunks > PARALLEL_CHUNK_THRESHOLD {
            (0..num_chunks).into_par_iter().map(search_one).collect()
        } else {
            (0..num_chunks).map(search_one).collect()
        };

        let mut merged = SubQueryResult::new(queries.num_queries(), topk, metric);
        for partial in partials {
            merged.merge(&partial?);
        }
        Ok(merged)
    }

    fn check_search(&self, _plan: &Plan) -> Result<()> {
        // Growing columns exist from creation; every schema field is
        // servable.
        Ok(())
    }

    fn bulk_subscript(&self, field: FieldOffset, offsets: &[i64]) -> Result<FieldColumn> {
        Ok(self.record.column(field).gather(offsets))
    }

    fn lookup_primary_keys(&self, ids: &[i64], ts: Timestamp) -> Result<Vec<i64>> {
        let insert_barrier = self.record.ts_barrier(ts);
        let del_barrier = self.deleted.ts_barrier(ts);
        let tombstones = self.get_deleted_bitmap(del_barrier, ts, insert_barrier);

        let map = self.uid_offsets.lock();
        Ok(ids
            .iter()
            .map(|id| {
                map.get(id)
                    .and_then(|offsets| {
                        offsets
                            .iter()
                            .copied()
                            .filter(|&offset| {
                                offset < insert_barrier
                                    && !tombstones.deleted.contains(offset as u32)
                            })
                            .max()
                    })
                    .unwrap_or(-1)
            })
            .collect())
    }

    fn fill_primary_keys(&self, offsets: &[i64]) -> Result<Vec<i64>> {
        Ok(offsets
            .iter()
            .map(|&offset| {
                if offset < 0 {
                    -1
                } else {
                    self.record.uids.get(offset as usize)
                }
            })
            .collect())
    }
}
