//! Flat (exact) vector index.
//!
//! Owns a row-major copy of its vectors and answers every query by brute
//! force. Exists as the exactness baseline: tests compare ANN results
//! against it, and it is the simplest index a caller can attach to a
//! sealed segment.

use crate::bitmap::RowBitmap;
use crate::error::{LodestoneError, Result};
use crate::metric::MetricType;
use crate::query::brute_force::search_chunk_brute_force;
use crate::query::placeholder::QueryVectors;
use crate::query::sub_result::SubQueryResult;
use crate::segment::column::FieldColumn;

use super::VectorIndex;

pub struct FlatIndex {
    metric: MetricType,
    column: FieldColumn,
    row_count: usize,
}

impl FlatIndex {
    /// Build over row-major float vectors.
    pub fn from_float(metric: MetricType, dim: usize, data: Vec<f32>) -> Result<Self> {
        if metric.is_binary() {
            return Err(LodestoneError::index(format!(
                "metric {} does not apply to float vectors",
                metric.name()
            )));
        }
        if dim == 0 || data.len() % dim != 0 {
            return Err(LodestoneError::index(format!(
                "flat index data of {} floats is not a multiple of dim {dim}",
                data.len()
            )));
        }
        let row_count = data.len() / dim;
        Ok(Self {
            metric,
            column: FieldColumn::FloatVector {
                dim,
                data: std::sync::Arc::new(data),
            },
            row_count,
        })
    }

    /// Build over row-major binary vectors of `dim` bits.
    pub fn from_binary(metric: MetricType, dim: usize, data: Vec<u8>) -> Result<Self> {
        if !metric.is_binary() {
            return Err(LodestoneError::index(format!(
                "metric {} does not apply to binary vectors",
                metric.name()
            )));
        }
        if dim == 0 || dim % 8 != 0 || data.len() % (dim / 8) != 0 {
            return Err(LodestoneError::index(format!(
                "flat index data of {} bytes is not a multiple of the {dim}-bit row",
                data.len()
            )));
        }
        let row_count = data.len() / (dim / 8);
        Ok(Self {
            metric,
            column: FieldColumn::BinaryVector {
                dim,
                data: std::sync::Arc::new(data),
            },
            row_count,
        })
    }
}

impl VectorIndex for FlatIndex {
    fn row_count(&self) -> i64 {
        self.row_count as i64
    }

    fn metric(&self) -> MetricType {
        self.metric
    }

    fn search(
        &self,
        queries: &QueryVectors,
        topk: usize,
        _params: &serde_json::Value,
        bitmap: Option<&RowBitmap>,
    ) -> Result<SubQueryResult> {
        search_chunk_brute_force(
            self.metric,
            queries,
            &self.column.vector_chunk()?,
            self.row_count,
            topk,
            bitmap,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::placeholder::PlaceholderGroup;

    #[test]
    fn test_flat_search() {
        let index = FlatIndex::from_float(
            MetricType::L2,
            2,
            vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
        )
        .unwrap();
        assert_eq!(index.row_count(), 3);

        let group = PlaceholderGroup::from_float_queries(2, &[vec![0.9, 0.9]]).unwrap();
        let result = index
            .search(&group.vectors, 2, &serde_json::Value::Null, None)
            .unwrap();
        let (_, offsets) = result.stripe(0);
        assert_eq!(offsets, &[1, 0]);
    }

    #[test]
    fn test_metric_input_mismatch() {
        assert!(FlatIndex::from_float(MetricType::Jaccard, 2, vec![0.0; 4]).is_err());
        assert!(FlatIndex::from_binary(MetricType::L2, 8, vec![0; 4]).is_err());
    }
}
