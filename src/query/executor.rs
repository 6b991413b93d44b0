//! Query execution against a segment.
//!
//! Phase 1 evaluates the predicate tree bottom-up into a row bitmap
//! (consulting scalar indexes where the segment has them, scanning
//! otherwise). Phase 2 subtracts the deleted-row bitmap. Phase 3 hands the
//! combined bitmap to the segment's vector search. Phase 4 finalizes the
//! top-K stripes.

use crate::bitmap::RowBitmap;
use crate::error::{LodestoneError, Result};
use crate::query::placeholder::PlaceholderGroup;
use crate::query::plan::{CompareOp, Expr, Plan, ScalarValue};
use crate::query::reduce::{finalize, SearchResult};
use crate::query::sub_result::SubQueryResult;
use crate::schema::{DataType, FieldOffset};
use crate::segment::column::ScalarChunk;
use crate::segment::Segment;
use crate::Timestamp;

/// Execute a search plan against a segment at read timestamp `ts`.
pub fn search(
    segment: &dyn Segment,
    plan: &Plan,
    placeholder: &PlaceholderGroup,
    ts: Timestamp,
) -> Result<SearchResult> {
    segment.check_search(plan)?;
    check_placeholder(plan, placeholder)?;

    let num_queries = placeholder.num_queries();
    let topk = plan.topk();
    let metric = plan.metric();
    let info = plan.vector();

    let row_count = segment.visible_row_count(ts);
    if num_queries == 0 || topk == 0 || row_count == 0 {
        return Ok(finalize(
            SubQueryResult::new(num_queries, topk, metric),
            info.round_decimal,
        ));
    }

    let mut allowed = eval_predicate(segment, plan.predicate(), row_count)?;
    let deleted = segment.deleted_bitmap(ts, row_count)?;
    allowed.and_not(&deleted);

    let partial = segment.vector_search(info, &placeholder.vectors, &allowed, row_count)?;
    Ok(finalize(partial, info.round_decimal))
}

fn check_placeholder(plan: &Plan, placeholder: &PlaceholderGroup) -> Result<()> {
    let meta = plan.schema().field(plan.vector().field);
    let matches = match meta.data_type {
        DataType::FloatVector { dim } => {
            !placeholder.vectors.is_binary() && placeholder.vectors.dim() == dim
        }
        DataType::BinaryVector { dim } => {
            placeholder.vectors.is_binary() && placeholder.vectors.dim() == dim
        }
        _ => false,
    };
    if !matches {
        return Err(LodestoneError::query(format!(
            "placeholder group does not match vector field '{}' ({})",
            meta.name,
            meta.data_type.name()
        )));
    }
    Ok(())
}

/// Evaluate an optional predicate to the allow-bitmap over
/// `[0, row_count)`. No predicate means every row passes.
pub fn eval_predicate(
    segment: &dyn Segment,
    predicate: Option<&Expr>,
    row_count: i64,
) -> Result<RowBitmap> {
    match predicate {
        None => Ok(RowBitmap::full(row_count as u32)),
        Some(expr) => eval_expr(segment, expr, row_count),
    }
}

fn eval_expr(segment: &dyn Segment, expr: &Expr, row_count: i64) -> Result<RowBitmap> {
    let len = row_count as u32;
    match expr {
        Expr::AlwaysTrue => Ok(RowBitmap::full(len)),
        Expr::Not(child) => {
            let mut bitmap = eval_expr(segment, child, row_count)?;
            bitmap.flip();
            Ok(bitmap)
        }
        Expr::And(left, right) => {
            let mut bitmap = eval_expr(segment, left, row_count)?;
            bitmap.and(&eval_expr(segment, right, row_count)?);
            Ok(bitmap)
        }
        Expr::Or(left, right) => {
            let mut bitmap = eval_expr(segment, left, row_count)?;
            bitmap.or(&eval_expr(segment, right, row_count)?);
            Ok(bitmap)
        }
        Expr::UnaryRange { field, op, value } => {
            if let Some(index) = segment.scalar_index(*field) {
                return Ok(index.unary_range(*op, value, len));
            }
            scan(segment, *field, row_count, |chunk, i| {
                compare_value(chunk, i, *op, value)
            })
        }
        Expr::BinaryRange {
            field,
            lo_op,
            lo,
            hi_op,
            hi,
        } => {
            if let Some(index) = segment.scalar_index(*field) {
                return Ok(index.binary_range(*lo_op, lo, *hi_op, hi, len));
            }
            // lo_op/hi_op compare the field against the bound, so gt means
            // "field > lo".
            scan(segment, *field, row_count, |chunk, i| {
                compare_value(chunk, i, *lo_op, lo) && compare_value(chunk, i, *hi_op, hi)
            })
        }
        Expr::Term { field, values } => {
            if let Some(index) = segment.scalar_index(*field) {
                return Ok(index.term(values, len));
            }
            let lookup = TermSet::new(values);
            scan(segment, *field, row_count, |chunk, i| {
                lookup.contains(chunk, i)
            })
        }
        Expr::Compare { left, op, right } => {
            scan2(segment, *left, *right, row_count, |a, b, i| {
                op.eval(&a.get_f64(i), &b.get_f64(i))
            })
        }
    }
}

/// Element-wise comparison against a plan constant. Plan construction
/// coerces constants to the column's value class, so unmatched pairs are
/// unreachable.
fn compare_value(chunk: &ScalarChunk, i: usize, op: CompareOp, value: &ScalarValue) -> bool {
    match (chunk, value) {
        (ScalarChunk::Bool(data), ScalarValue::Bool(v)) => op.eval(&data[i], v),
        (ScalarChunk::Int8(data), ScalarValue::Int(v)) => op.eval(&(data[i] as i64), v),
        (ScalarChunk::Int16(data), ScalarValue::Int(v)) => op.eval(&(data[i] as i64), v),
        (ScalarChunk::Int32(data), ScalarValue::Int(v)) => op.eval(&(data[i] as i64), v),
        (ScalarChunk::Int64(data), ScalarValue::Int(v)) => op.eval(&data[i], v),
        (ScalarChunk::Float(data), ScalarValue::Float(v)) => op.eval(&(data[i] as f64), v),
        (ScalarChunk::Double(data), ScalarValue::Float(v)) => op.eval(&data[i], v),
        _ => {
            debug_assert!(false, "predicate constant class does not match the column");
            false
        }
    }
}

/// Sorted term constants widened to their value class.
enum TermSet {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl TermSet {
    fn new(values: &[ScalarValue]) -> Self {
        match values.first() {
            Some(ScalarValue::Bool(_)) => TermSet::Bool(
                values
                    .iter()
                    .filter_map(|v| match v {
                        ScalarValue::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(ScalarValue::Float(_)) => TermSet::Float(
                values
                    .iter()
                    .filter_map(|v| match v {
                        ScalarValue::Float(f) => Some(*f),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => TermSet::Int(
                values
                    .iter()
                    .filter_map(|v| match v {
                        ScalarValue::Int(x) => Some(*x),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    fn contains(&self, chunk: &ScalarChunk, i: usize) -> bool {
        match (self, chunk) {
            (TermSet::Bool(set), ScalarChunk::Bool(data)) => set.binary_search(&data[i]).is_ok(),
            (TermSet::Int(set), ScalarChunk::Int8(data)) => {
                set.binary_search(&(data[i] as i64)).is_ok()
            }
            (TermSet::Int(set), ScalarChunk::Int16(data)) => {
                set.binary_search(&(data[i] as i64)).is_ok()
            }
            (TermSet::Int(set), ScalarChunk::Int32(data)) => {
                set.binary_search(&(data[i] as i64)).is_ok()
            }
            (TermSet::Int(set), ScalarChunk::Int64(data)) => set.binary_search(&data[i]).is_ok(),
            (TermSet::Float(set), ScalarChunk::Float(data)) => set
                .binary_search_by(|probe| probe.total_cmp(&(data[i] as f64)))
                .is_ok(),
            (TermSet::Float(set), ScalarChunk::Double(data)) => set
                .binary_search_by(|probe| probe.total_cmp(&data[i]))
                .is_ok(),
            _ => false,
        }
    }
}

/// Scan one scalar column chunk by chunk, setting bits where the
/// predicate holds.
fn scan<F>(
    segment: &dyn Segment,
    field: FieldOffset,
    row_count: i64,
    predicate: F,
) -> Result<RowBitmap>
where
    F: Fn(&ScalarChunk, usize) -> bool,
{
    let total = row_count as usize;
    let mut bitmap = RowBitmap::empty(row_count as u32);
    let size_per_chunk = segment.size_per_chunk().max(1);

    let mut base = 0;
    let mut chunk_id = 0;
    while base < total {
        let rows_here = size_per_chunk.min(total - base);
        let chunk = segment.scalar_chunk(field, chunk_id)?;
        for i in 0..rows_here {
            if predicate(&chunk, i) {
                bitmap.set((base + i) as u32);
            }
        }
        base += rows_here;
        chunk_id += 1;
    }
    Ok(bitmap)
}

/// Scan two scalar columns in lockstep.
fn scan2<F>(
    segment: &dyn Segment,
    left: FieldOffset,
    right: FieldOffset,
    row_count: i64,
    predicate: F,
) -> Result<RowBitmap>
where
    F: Fn(&ScalarChunk, &ScalarChunk, usize) -> bool,
{
    let total = row_count as usize;
    let mut bitmap = RowBitmap::empty(row_count as u32);
    let size_per_chunk = segment.size_per_chunk().max(1);

    let mut base = 0;
    let mut chunk_id = 0;
    while base < total {
        let rows_here = size_per_chunk.min(total - base);
        let left_chunk = segment.scalar_chunk(left, chunk_id)?;
        let right_chunk = segment.scalar_chunk(right, chunk_id)?;
        for i in 0..rows_here {
            if predicate(&left_chunk, &right_chunk, i) {
                bitmap.set((base + i) as u32);
            }
        }
        base += rows_here;
        chunk_id += 1;
    }
    Ok(bitmap)
}
