//! Final top-K reduction.
//!
//! Per-chunk partial results are merged inside
//! [`SubQueryResult::merge`](crate::query::sub_result::SubQueryResult);
//! this module owns the last step, turning the merged stripes into the
//! caller-facing [`SearchResult`] with `round_decimal` applied. Merging
//! across segments belongs to the caller.

use crate::query::sub_result::SubQueryResult;

/// The final result of one search: `num_queries` contiguous stripes of
/// `topk` slots, best-first. Unfilled slots carry offset `-1` and the
/// metric's sentinel distance.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub num_queries: usize,
    pub topk: usize,
    pub distances: Vec<f32>,
    pub seg_offsets: Vec<i64>,
}

impl SearchResult {
    /// The `q`-th stripe as `(distances, offsets)`.
    pub fn stripe(&self, q: usize) -> (&[f32], &[i64]) {
        let range = q * self.topk..(q + 1) * self.topk;
        (&self.distances[range.clone()], &self.seg_offsets[range])
    }
}

/// Apply `round_decimal` and freeze the merged stripes into a
/// [`SearchResult`].
pub fn finalize(partial: SubQueryResult, round_decimal: i32) -> SearchResult {
    let num_queries = partial.num_queries();
    let topk = partial.topk();
    let (mut distances, seg_offsets) = partial.into_parts();

    if round_decimal >= 0 {
        let factor = 10f32.powi(round_decimal);
        for distance in &mut distances {
            if distance.is_finite() {
                *distance = (*distance * factor).trunc() / factor;
            }
        }
    }

    SearchResult {
        num_queries,
        topk,
        distances,
        seg_offsets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricType;

    #[test]
    fn test_round_decimal_truncates() {
        let mut partial = SubQueryResult::new(1, 2, MetricType::L2);
        partial.set_stripe(0, &[(1.2399, 0), (2.5678, 1)]);

        let result = finalize(partial, 2);
        assert_eq!(result.distances, &[1.23, 2.56]);
    }

    #[test]
    fn test_negative_round_decimal_is_identity() {
        let mut partial = SubQueryResult::new(1, 1, MetricType::L2);
        partial.set_stripe(0, &[(1.2345, 0)]);

        let result = finalize(partial, -1);
        assert_eq!(result.distances, &[1.2345]);
    }

    #[test]
    fn test_sentinels_survive() {
        let partial = SubQueryResult::new(2, 2, MetricType::Ip);
        let result = finalize(partial, 3);
        assert!(result.distances.iter().all(|d| *d == f32::NEG_INFINITY));
        assert!(result.seg_offsets.iter().all(|&o| o == -1));
        assert_eq!(result.stripe(1).0.len(), 2);
    }
}
