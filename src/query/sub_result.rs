//! Partial top-K results and their metric-aware merge.

use crate::metric::MetricType;

/// Whether result slot `(distance_a, offset_a)` ranks strictly before
/// `(distance_b, offset_b)` under the metric.
///
/// A slot with offset `-1` is an unfilled sentinel and ranks after every
/// real slot; among real slots with equal distances the lower segment
/// offset wins, which keeps reductions deterministic.
pub fn ranks_before(metric: MetricType, distance_a: f32, offset_a: i64, distance_b: f32, offset_b: i64) -> bool {
    if offset_a < 0 {
        return false;
    }
    if offset_b < 0 {
        return true;
    }
    match distance_a.total_cmp(&distance_b) {
        std::cmp::Ordering::Equal => offset_a < offset_b,
        ordering => {
            if metric.smaller_is_better() {
                ordering == std::cmp::Ordering::Less
            } else {
                ordering == std::cmp::Ordering::Greater
            }
        }
    }
}

/// Per-chunk (or per-index) top-K partial result: `num_queries` contiguous
/// stripes of `topk` slots, each stripe ordered best-first. Unfilled slots
/// carry offset `-1` and the metric's sentinel distance.
#[derive(Debug, Clone)]
pub struct SubQueryResult {
    num_queries: usize,
    topk: usize,
    metric: MetricType,
    distances: Vec<f32>,
    offsets: Vec<i64>,
}

impl SubQueryResult {
    pub fn new(num_queries: usize, topk: usize, metric: MetricType) -> Self {
        Self {
            num_queries,
            topk,
            metric,
            distances: vec![metric.sentinel(); num_queries * topk],
            offsets: vec![-1; num_queries * topk],
        }
    }

    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    pub fn topk(&self) -> usize {
        self.topk
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    /// The `q`-th stripe as `(distances, offsets)`.
    pub fn stripe(&self, q: usize) -> (&[f32], &[i64]) {
        let range = q * self.topk..(q + 1) * self.topk;
        (&self.distances[range.clone()], &self.offsets[range])
    }

    /// Overwrite the `q`-th stripe with up to `topk` slots already ordered
    /// best-first; the tail keeps its sentinels.
    pub fn set_stripe(&mut self, q: usize, slots: &[(f32, i64)]) {
        debug_assert!(slots.len() <= self.topk);
        let base = q * self.topk;
        for (i, &(distance, offset)) in slots.iter().enumerate() {
            self.distances[base + i] = distance;
            self.offsets[base + i] = offset;
        }
        for i in slots.len()..self.topk {
            self.distances[base + i] = self.metric.sentinel();
            self.offsets[base + i] = -1;
        }
    }

    /// Consume into `(distances, offsets)`.
    pub fn into_parts(self) -> (Vec<f32>, Vec<i64>) {
        (self.distances, self.offsets)
    }

    /// Add `delta` to every real offset (chunk-local results become
    /// segment-global).
    pub fn rebase_offsets(&mut self, delta: i64) {
        for offset in &mut self.offsets {
            if *offset >= 0 {
                *offset += delta;
            }
        }
    }

    /// Merge another partial result into this one, keeping the best
    /// `topk` per query. Both sides must agree on shape and metric.
    pub fn merge(&mut self, other: &SubQueryResult) {
        debug_assert_eq!(self.num_queries, other.num_queries);
        debug_assert_eq!(self.topk, other.topk);
        debug_assert_eq!(self.metric, other.metric);

        let topk = self.topk;
        let mut merged_distances = vec![self.metric.sentinel(); self.num_queries * topk];
        let mut merged_offsets = vec![-1i64; self.num_queries * topk];

        for q in 0..self.num_queries {
            let base = q * topk;
            let mut left = 0;
            let mut right = 0;
            for slot in 0..topk {
                let take_left = right >= topk
                    || (left < topk
                        && ranks_before(
                            self.metric,
                            self.distances[base + left],
                            self.offsets[base + left],
                            other.distances[base + right],
                            other.offsets[base + right],
                        ));
                if take_left {
                    merged_distances[base + slot] = self.distances[base + left];
                    merged_offsets[base + slot] = self.offsets[base + left];
                    left += 1;
                } else {
                    merged_distances[base + slot] = other.distances[base + right];
                    merged_offsets[base + slot] = other.offsets[base + right];
                    right += 1;
                }
            }
        }

        self.distances = merged_distances;
        self.offsets = merged_offsets;
    }
}
