//! Placeholder groups: the query vectors accompanying a plan.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LodestoneError, Result};
use crate::schema::DataType;

/// Packed query vectors, one entry per query, all of the same dtype and
/// dimension.
#[derive(Debug, Clone)]
pub enum QueryVectors {
    Float { dim: usize, data: Vec<f32> },
    Binary { dim: usize, data: Vec<u8> },
}

impl QueryVectors {
    pub fn num_queries(&self) -> usize {
        match self {
            QueryVectors::Float { dim, data } => data.len() / dim,
            QueryVectors::Binary { dim, data } => data.len() / (dim / 8),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            QueryVectors::Float { dim, .. } | QueryVectors::Binary { dim, .. } => *dim,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, QueryVectors::Binary { .. })
    }

    /// The `q`-th float query vector.
    pub fn float_query(&self, q: usize) -> &[f32] {
        match self {
            QueryVectors::Float { dim, data } => &data[q * dim..(q + 1) * dim],
            QueryVectors::Binary { .. } => &[],
        }
    }

    /// The `q`-th binary query vector (`dim / 8` bytes).
    pub fn binary_query(&self, q: usize) -> &[u8] {
        match self {
            QueryVectors::Binary { dim, data } => {
                let bytes = dim / 8;
                &data[q * bytes..(q + 1) * bytes]
            }
            QueryVectors::Float { .. } => &[],
        }
    }
}

/// The parsed query vectors for one search call.
#[derive(Debug, Clone)]
pub struct PlaceholderGroup {
    pub vectors: QueryVectors,
}

impl PlaceholderGroup {
    /// Parse a packed little-endian blob of `nq * dim * sizeof(elem)`
    /// bytes against the vector field's dtype.
    pub fn parse(data_type: DataType, blob: &[u8]) -> Result<Self> {
        let vectors = match data_type {
            DataType::FloatVector { dim } => {
                let row_bytes = dim * 4;
                if blob.len() % row_bytes != 0 {
                    return Err(LodestoneError::query(format!(
                        "placeholder blob of {} bytes is not a multiple of the {row_bytes}-byte query size",
                        blob.len()
                    )));
                }
                let mut data = vec![0.0f32; blob.len() / 4];
                LittleEndian::read_f32_into(blob, &mut data);
                QueryVectors::Float { dim, data }
            }
            DataType::BinaryVector { dim } => {
                let row_bytes = dim / 8;
                if blob.len() % row_bytes != 0 {
                    return Err(LodestoneError::query(format!(
                        "placeholder blob of {} bytes is not a multiple of the {row_bytes}-byte query size",
                        blob.len()
                    )));
                }
                QueryVectors::Binary {
                    dim,
                    data: blob.to_vec(),
                }
            }
            other => {
                return Err(LodestoneError::query(format!(
                    "placeholder group requires a vector field, got {}",
                    other.name()
                )))
            }
        };
        Ok(Self { vectors })
    }

    /// Build a group from float query vectors.
    pub fn from_float_queries(dim: usize, queries: &[Vec<f32>]) -> Result<Self> {
        let mut data = Vec::with_capacity(queries.len() * dim);
        for query in queries {
            if query.len() != dim {
                return Err(LodestoneError::query(format!(
                    "query vector has dim {}, expected {dim}",
                    query.len()
                )));
            }
            data.extend_from_slice(query);
        }
        Ok(Self {
            vectors: QueryVectors::Float { dim, data },
        })
    }

    /// Build a group from binary query vectors.
    pub fn from_binary_queries(dim: usize, queries: &[Vec<u8>]) -> Result<Self> {
        let bytes = dim / 8;
        let mut data = Vec::with_capacity(queries.len() * bytes);
        for query in queries {
            if query.len() != bytes {
                return Err(LodestoneError::query(format!(
                    "binary query vector has {} bytes, expected {bytes}",
                    query.len()
                )));
            }
            data.extend_from_slice(query);
        }
        Ok(Self {
            vectors: QueryVectors::Binary { dim, data },
        })
    }

    pub fn num_queries(&self) -> usize {
        self.vectors.num_queries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float_blob() {
        let mut blob = vec![0u8; 2 * 2 * 4];
        LittleEndian::write_f32_into(&[1.0, 2.0, 3.0, 4.0], &mut blob);
        let group =
            PlaceholderGroup::parse(DataType::FloatVector { dim: 2 }, &blob).unwrap();
        assert_eq!(group.num_queries(), 2);
        assert_eq!(group.vectors.float_query(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_parse_rejects_ragged_blob() {
        let blob = vec![0u8; 7];
        assert!(PlaceholderGroup::parse(DataType::FloatVector { dim: 2 }, &blob).is_err());
        assert!(PlaceholderGroup::parse(DataType::Int64, &blob).is_err());
    }

    #[test]
    fn test_binary_queries() {
        let group =
            PlaceholderGroup::from_binary_queries(16, &[vec![0xff, 0x00], vec![0x0f, 0xf0]])
                .unwrap();
        assert_eq!(group.num_queries(), 2);
        assert_eq!(group.vectors.binary_query(0), &[0xff, 0x00]);
    }
}
