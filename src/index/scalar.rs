//! Sorted scalar lookup structures for sealed-segment columns.
//!
//! A scalar index is a sorted list of `(value, row_offset)` pairs built
//! once when a column is loaded. Term and range predicates resolve to row
//! bitmaps through binary search instead of scanning the column.

use std::cmp::Ordering;

use crate::bitmap::RowBitmap;
use crate::query::plan::{CompareOp, ScalarValue};
use crate::segment::column::ScalarChunk;

/// Sorted `(value, offset)` pairs. Integer columns widen to `i64`, float
/// columns to `f64`; both are exact.
pub enum ScalarIndex {
    Bool(Vec<(bool, u32)>),
    Int(Vec<(i64, u32)>),
    Float(Vec<(f64, u32)>),
}

impl ScalarIndex {
    /// Build from a fully loaded column.
    pub fn build(chunk: &ScalarChunk, row_count: usize) -> Self {
        fn sorted<T: Copy, F: Fn(&T, &T) -> Ordering>(
            values: impl Iterator<Item = T>,
            cmp: F,
        ) -> Vec<(T, u32)> {
            let mut pairs: Vec<(T, u32)> = values
                .enumerate()
                .map(|(offset, value)| (value, offset as u32))
                .collect();
            pairs.sort_by(|a, b| cmp(&a.0, &b.0).then(a.1.cmp(&b.1)));
            pairs
        }

        match chunk {
            ScalarChunk::Bool(view) => {
                ScalarIndex::Bool(sorted(view[..row_count].iter().copied(), bool::cmp))
            }
            ScalarChunk::Int8(view) => ScalarIndex::Int(sorted(
                view[..row_count].iter().map(|&v| v as i64),
                i64::cmp,
            )),
            ScalarChunk::Int16(view) => ScalarIndex::Int(sorted(
                view[..row_count].iter().map(|&v| v as i64),
                i64::cmp,
            )),
            ScalarChunk::Int32(view) => ScalarIndex::Int(sorted(
                view[..row_count].iter().map(|&v| v as i64),
                i64::cmp,
            )),
            ScalarChunk::Int64(view) => {
                ScalarIndex::Int(sorted(view[..row_count].iter().copied(), i64::cmp))
            }
            ScalarChunk::Float(view) => ScalarIndex::Float(sorted(
                view[..row_count].iter().map(|&v| v as f64),
                f64::total_cmp,
            )),
            ScalarChunk::Double(view) => ScalarIndex::Float(sorted(
                view[..row_count].iter().copied(),
                f64::total_cmp,
            )),
        }
    }

    /// Evaluate `column <op> value` to a bitmap over `[0, len)`.
    pub fn unary_range(&self, op: CompareOp, value: &ScalarValue, len: u32) -> RowBitmap {
        match (self, value) {
            (ScalarIndex::Bool(pairs), ScalarValue::Bool(v)) => {
                range_lookup(pairs, op, *v, len, bool::cmp)
            }
            (ScalarIndex::Int(pairs), ScalarValue::Int(v)) => {
                range_lookup(pairs, op, *v, len, i64::cmp)
            }
            (ScalarIndex::Float(pairs), ScalarValue::Float(v)) => {
                range_lookup(pairs, op, *v, len, f64::total_cmp)
            }
            // Plan construction coerces constants to the column's class.
            _ => {
                debug_assert!(false, "scalar index consulted with mismatched value class");
                RowBitmap::empty(len)
            }
        }
    }

    /// Evaluate `lo <lo_op> column <hi_op> hi` to a bitmap over `[0, len)`.
    pub fn binary_range(
        &self,
        lo_op: CompareOp,
        lo: &ScalarValue,
        hi_op: CompareOp,
        hi: &ScalarValue,
        len: u32,
    ) -> RowBitmap {
        let mut bitmap = self.unary_range(lo_op, lo, len);
        bitmap.and(&self.unary_range(hi_op, hi, len));
        bitmap
    }

    /// The greatest row offset whose integer value equals `value`. Used
    /// for primary-key point lookups; non-integer indexes have none.
    pub fn max_offset_eq_int(&self, value: i64) -> Option<u32> {
        match self {
            ScalarIndex::Int(pairs) => {
                let lower = pairs.partition_point(|(k, _)| *k < value);
                let upper = pairs.partition_point(|(k, _)| *k <= value);
                pairs[lower..upper].iter().map(|&(_, offset)| offset).max()
            }
            _ => None,
        }
    }

    /// Evaluate `column IN values` to a bitmap over `[0, len)`.
    pub fn term(&self, values: &[ScalarValue], len: u32) -> RowBitmap {
        let mut bitmap = RowBitmap::empty(len);
        for value in values {
            bitmap.or(&self.unary_range(CompareOp::Eq, value, len));
        }
        bitmap
    }
}

fn range_lookup<T: Copy, C: Fn(&T, &T) -> Ordering>(
    pairs: &[(T, u32)],
    op: CompareOp,
    value: T,
    len: u32,
    cmp: C,
) -> RowBitmap {
    // First index whose value is >= / > the probe.
    let lower = pairs.partition_point(|(k, _)| cmp(k, &value) == Ordering::Less);
    let upper = pairs.partition_point(|(k, _)| cmp(k, &value) != Ordering::Greater);

    let matched: &[(T, u32)] = match op {
        CompareOp::Lt => &pairs[..lower],
        CompareOp::Le => &pairs[..upper],
        CompareOp::Gt => &pairs[upper..],
        CompareOp::Ge => &pairs[lower..],
        CompareOp::Eq => &pairs[lower..upper],
        CompareOp::Ne => {
            let mut bitmap = RowBitmap::full(len);
            for &(_, offset) in &pairs[lower..upper] {
                bitmap.clear(offset);
            }
            return bitmap;
        }
    };

    let mut bitmap = RowBitmap::empty(len);
    for &(_, offset) in matched {
        bitmap.set(offset);
    }
    bitmap
}
