//! Brute-force kNN over raw column chunks.

use rayon::prelude::*;

use crate::bitmap::RowBitmap;
use crate::error::{LodestoneError, Result};
use crate::metric::MetricType;
use crate::query::placeholder::QueryVectors;
use crate::query::sub_result::{ranks_before, SubQueryResult};
use crate::segment::column::VectorChunk;

/// Queries below this count run sequentially.
const PARALLEL_QUERY_THRESHOLD: usize = 8;

/// Exhaustive top-K over one chunk of raw vectors.
///
/// `bitmap`, when present, is the allow-list over the chunk's local rows;
/// its length must be `row_count`. Result offsets are local to the chunk;
/// callers rebase them.
pub fn search_chunk_brute_force(
    metric: MetricType,
    queries: &QueryVectors,
    chunk: &VectorChunk,
    row_count: usize,
    topk: usize,
    bitmap: Option<&RowBitmap>,
) -> Result<SubQueryResult> {
    match (chunk, queries) {
        (VectorChunk::Float { dim, data }, QueryVectors::Float { dim: query_dim, .. }) => {
            let dim = *dim;
            if dim != *query_dim {
                return Err(LodestoneError::query(format!(
                    "query dim {query_dim} does not match column dim {dim}"
                )));
            }
            let rows = &data[..row_count * dim];
            search_typed(metric, queries, topk, bitmap, row_count, |q, row| {
                metric.float_distance(queries.float_query(q), &rows[row * dim..(row + 1) * dim])
            })
        }
        (
            VectorChunk::Binary {
                bytes_per_row,
                data,
            },
            QueryVectors::Binary { dim: query_dim, .. },
        ) => {
            if *bytes_per_row != query_dim / 8 {
                return Err(LodestoneError::query(format!(
                    "query dim {query_dim} does not match column width {bytes_per_row} bytes"
                )));
            }
            let width = *bytes_per_row;
            let rows = &data[..row_count * width];
            search_typed(metric, queries, topk, bitmap, row_count, |q, row| {
                metric.binary_distance(
                    queries.binary_query(q),
                    &rows[row * width..(row + 1) * width],
                )
            })
        }
        _ => Err(LodestoneError::query(
            "query vector dtype does not match the column dtype",
        )),
    }
}

fn search_typed<F>(
    metric: MetricType,
    queries: &QueryVectors,
    topk: usize,
    bitmap: Option<&RowBitmap>,
    row_count: usize,
    distance: F,
) -> Result<SubQueryResult>
where
    F: Fn(usize, usize) -> f32 + Sync,
{
    let num_queries = queries.num_queries();
    let mut result = SubQueryResult::new(num_queries, topk, metric);
    if topk == 0 || num_queries == 0 || row_count == 0 {
        return Ok(result);
    }

    let search_one = |q: usize| -> Vec<(f32, i64)> {
        let mut slots: Vec<(f32, i64)> = match bitmap {
            Some(bitmap) => bitmap
                .iter()
                .take_while(|&row| (row as usize) < row_count)
                .map(|row| (distance(q, row as usize), row as i64))
                .collect(),
            None => (0..row_count)
                .map(|row| (distance(q, row), row as i64))
                .collect(),
        };
        slots.sort_unstable_by(|a, b| {
            if ranks_before(metric, a.0, a.1, b.0, b.1) {
                std::cmp::Ordering::Less
            } else if ranks_before(metric, b.0, b.1, a.0, a.1) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        slots.truncate(topk);
        slots
    };

    let stripes: Vec<Vec<(f32, i64)>> = if num_queries >= PARALLEL_QUERY_THRESHOLD {
        (0..num_queries).into_par_iter().map(search_one).collect()
    } else {
        (0..num_queries).map(search_one).collect()
    };

    for (q, stripe) in stripes.iter().enumerate() {
        result.set_stripe(q, stripe);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::placeholder::PlaceholderGroup;
    use crate::segment::column::FieldColumn;
    use std::sync::Arc;

    fn unit_basis_chunk() -> FieldColumn {
        FieldColumn::FloatVector {
            dim: 4,
            data: Arc::new(vec![
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0,
            ]),
        }
    }

    #[test]
    fn test_l2_ranking() {
        let column = unit_basis_chunk();
        let chunk = column.vector_chunk().unwrap();
        let group =
            PlaceholderGroup::from_float_queries(4, &[vec![1.0, 0.0, 0.0, 0.0]]).unwrap();

        let result =
            search_chunk_brute_force(MetricType::L2, &group.vectors, &chunk, 3, 2, None).unwrap();
        let (distances, offsets) = result.stripe(0);
        assert_eq!(offsets, &[0, 1]);
        assert_eq!(distances, &[0.0, 2.0]);
    }

    #[test]
    fn test_bitmap_filters_rows() {
        let column = unit_basis_chunk();
        let chunk = column.vector_chunk().unwrap();
        let group =
            PlaceholderGroup::from_float_queries(4, &[vec![1.0, 0.0, 0.0, 0.0]]).unwrap();

        let mut allowed = RowBitmap::empty(3);
        allowed.set(1);
        allowed.set(2);
        let result =
            search_chunk_brute_force(MetricType::L2, &group.vectors, &chunk, 3, 3, Some(&allowed))
                .unwrap();
        let (distances, offsets) = result.stripe(0);
        // Row 0 is excluded; the tie between rows 1 and 2 breaks low-first.
        assert_eq!(offsets, &[1, 2, -1]);
        assert_eq!(distances[0], 2.0);
        assert_eq!(distances[2], f32::INFINITY);
    }

    #[test]
    fn test_ip_ranks_larger_first() {
        let column = FieldColumn::FloatVector {
            dim: 2,
            data: Arc::new(vec![1.0, 0.0, 3.0, 0.0, 2.0, 0.0]),
        };
        let chunk = column.vector_chunk().unwrap();
        let group = PlaceholderGroup::from_float_queries(2, &[vec![1.0, 0.0]]).unwrap();

        let result =
            search_chunk_brute_force(MetricType::Ip, &group.vectors, &chunk, 3, 3, None).unwrap();
        let (distances, offsets) = result.stripe(0);
        assert_eq!(offsets, &[1, 2, 0]);
        assert_eq!(distances, &[3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_binary_hamming() {
        let column = FieldColumn::BinaryVector {
            dim: 8,
            data: Arc::new(vec![0b0000_0000, 0b1111_1111, 0b0000_1111]),
        };
        let chunk = column.vector_chunk().unwrap();
        let group = PlaceholderGroup::from_binary_queries(8, &[vec![0b0000_0000]]).unwrap();

        let result =
            search_chunk_brute_force(MetricType::Hamming, &group.vectors, &chunk, 3, 2, None)
                .unwrap();
        let (distances, offsets) = result.stripe(0);
        assert_eq!(offsets, &[0, 2]);
        assert_eq!(distances, &[0.0, 4.0]);
    }

    #[test]
    fn test_dim_mismatch_rejected() {
        let column = unit_basis_chunk();
        let chunk = column.vector_chunk().unwrap();
        let group = PlaceholderGroup::from_float_queries(2, &[vec![1.0, 0.0]]).unwrap();
        assert!(
            search_chunk_brute_force(MetricType::L2, &group.vectors, &chunk, 3, 2, None).is_err()
        );
    }
}
