//! IVF (inverted file) vector index over float vectors.
//!
//! Rows are partitioned into `nlist` clusters by a short k-means run; a
//! query probes the `nprobe` nearest clusters and scans only their rows.
//! This is the reference implementation behind the growing segment's
//! per-chunk small index and the sealed-segment tests.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::bitmap::RowBitmap;
use crate::error::{LodestoneError, Result};
use crate::metric::{l2_sqr, MetricType};
use crate::query::placeholder::QueryVectors;
use crate::query::sub_result::{ranks_before, SubQueryResult};

use super::VectorIndex;

const KMEANS_ITERATIONS: usize = 8;
const PARALLEL_ASSIGN_THRESHOLD: usize = 4096;

/// The k-means training seed. Fixed so that rebuilding over the same rows
/// yields the same clustering.
const TRAIN_SEED: u64 = 0x10de_57012;

pub struct IvfIndex {
    metric: MetricType,
    dim: usize,
    default_nprobe: usize,
    /// `nlist * dim` cluster centers, row-major.
    centroids: Vec<f32>,
    /// Row offsets per cluster.
    lists: Vec<Vec<u32>>,
    /// Row-major copy of the indexed vectors.
    data: Vec<f32>,
}

impl IvfIndex {
    /// Train over row-major float vectors.
    pub fn train(
        metric: MetricType,
        dim: usize,
        data: Vec<f32>,
        nlist: usize,
        default_nprobe: usize,
    ) -> Result<Self> {
        if metric.is_binary() {
            return Err(LodestoneError::index(format!(
                "metric {} does not apply to float vectors",
                metric.name()
            )));
        }
        if dim == 0 || data.len() % dim != 0 || data.is_empty() {
            return Err(LodestoneError::index(format!(
                "IVF training data of {} floats is not a positive multiple of dim {dim}",
                data.len()
            )));
        }
        let row_count = data.len() / dim;
        let nlist = nlist.clamp(1, row_count);

        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);
        let seeds = rand::seq::index::sample(&mut rng, row_count, nlist);
        let mut centroids = Vec::with_capacity(nlist * dim);
        for row in seeds {
            centroids.extend_from_slice(&data[row * dim..(row + 1) * dim]);
        }

        let mut assignments = vec![0usize; row_count];
        for _ in 0..KMEANS_ITERATIONS {
            assign(&data, &centroids, dim, &mut assignments);

            let mut sums = vec![0.0f64; nlist * dim];
            let mut counts = vec![0usize; nlist];
            for (row, &list) in assignments.iter().enumerate() {
                counts[list] += 1;
                for d in 0..dim {
                    sums[list * dim + d] += data[row * dim + d] as f64;
                }
            }
            for list in 0..nlist {
                // Empty clusters keep their previous centroid.
                if counts[list] == 0 {
                    continue;
                }
                for d in 0..dim {
                    centroids[list * dim + d] = (sums[list * dim + d] / counts[list] as f64) as f32;
                }
            }
        }
        assign(&data, &centroids, dim, &mut assignments);

        let mut lists = vec![Vec::new(); nlist];
        for (row, &list) in assignments.iter().enumerate() {
            lists[list].push(row as u32);
        }

        Ok(Self {
            metric,
            dim,
            default_nprobe: default_nprobe.max(1),
            centroids,
            lists,
            data,
        })
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    fn nprobe_from(&self, params: &serde_json::Value) -> usize {
        params
            .get("nprobe")
            .and_then(serde_json::Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.default_nprobe)
            .clamp(1, self.nlist())
    }
}

/// Assign every row to its nearest centroid by squared L2.
fn assign(data: &[f32], centroids: &[f32], dim: usize, assignments: &mut [usize]) {
    let nearest = |row: usize| -> usize {
        let vector = &data[row * dim..(row + 1) * dim];
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (list, centroid) in centroids.chunks_exact(dim).enumerate() {
            let distance = l2_sqr(vector, centroid);
            if distance < best_distance {
                best_distance = distance;
                best = list;
            }
        }
        best
    };

    if assignments.len() >= PARALLEL_ASSIGN_THRESHOLD {
        assignments
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, slot)| *slot = nearest(row));
    } else {
        for (row, slot) in assignments.iter_mut().enumerate() {
            *slot = nearest(row);
        }
    }
}

impl VectorIndex for IvfIndex {
    fn row_count(&self) -> i64 {
        (self.data.len() / self.dim) as i64
    }

    fn metric(&self) -> MetricType {
        self.metric
    }

    fn search(
        &self,
        queries: &QueryVectors,
        topk: usize,
        params: &serde_json::Value,
        bitmap: Option<&RowBitmap>,
    ) -> Result<SubQueryResult> {
        let query_dim = match queries {
            QueryVectors::Float { dim, .. } => *dim,
            QueryVectors::Binary { .. } => {
                return Err(LodestoneError::index(
                    "IVF index does not accept binary queries",
                ))
            }
        };
        if query_dim != self.dim {
            return Err(LodestoneError::index(format!(
                "query dim {query_dim} does not match index dim {}",
                self.dim
            )));
        }

        let num_queries = queries.num_queries();
        let nprobe = self.nprobe_from(params);
        let mut result = SubQueryResult::new(num_queries, topk, self.metric);
        if topk == 0 || num_queries == 0 {
            return Ok(result);
        }

        for q in 0..num_queries {
            let query = queries.float_query(q);

            // Rank centroids under the search metric.
            let mut centroid_order: Vec<(f32, usize)> = self
                .centroids
                .chunks_exact(self.dim)
                .enumerate()
                .map(|(list, centroid)| (self.metric.float_distance(query, centroid), list))
                .collect();
            centroid_order.sort_unstable_by(|a, b| {
                if self.metric.is_better(a.0, b.0) {
                    std::cmp::Ordering::Less
                } else if self.metric.is_better(b.0, a.0) {
                    std::cmp::Ordering::Greater
                } else {
                    a.1.cmp(&b.1)
                }
            });

            let mut slots: Vec<(f32, i64)> = Vec::new();
            for &(_, list) in centroid_order.iter().take(nprobe) {
                for &row in &self.lists[list] {
                    if let Some(bitmap) = bitmap {
                        if !bitmap.contains(row) {
                            continue;
                        }
                    }
                    let row = row as usize;
                    let distance = self
                        .metric
                        .float_distance(query, &self.data[row * self.dim..(row + 1) * self.dim]);
                    slots.push((distance, row as i64));
                }
            }
            slots.sort_unstable_by(|a, b| {
                if ranks_before(self.metric, a.0, a.1, b.0, b.1) {
                    std::cmp::Ordering::Less
                } else if ranks_before(self.metric, b.0, b.1, a.0, a.1) {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            });
            slots.truncate(topk);
            result.set_stripe(q, &slots);
        }
        Ok(result)
    }
}
