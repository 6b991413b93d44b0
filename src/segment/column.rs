//! Typed column storage.
//!
//! Polymorphism over element types is a tagged variant at the column
//! level: [`ColumnData`] wraps the concurrent chunked columns of a growing
//! segment, [`FieldColumn`] wraps the single-chunk owned columns of a
//! sealed segment (and doubles as the output of `bulk_subscript`). Every
//! operation is monomorphized per element type inside one `match`; the
//! executor switches on the variant once per column.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LodestoneError, Result};
use crate::schema::{DataType, FieldMeta};
use crate::segment::concurrent_vector::{ChunkView, ConcurrentVector};

/// A borrowed span of one scalar column chunk.
pub enum ScalarChunk {
    Bool(ChunkView<bool>),
    Int8(ChunkView<i8>),
    Int16(ChunkView<i16>),
    Int32(ChunkView<i32>),
    Int64(ChunkView<i64>),
    Float(ChunkView<f32>),
    Double(ChunkView<f64>),
}

impl ScalarChunk {
    pub fn len(&self) -> usize {
        match self {
            ScalarChunk::Bool(view) => view.len(),
            ScalarChunk::Int8(view) => view.len(),
            ScalarChunk::Int16(view) => view.len(),
            ScalarChunk::Int32(view) => view.len(),
            ScalarChunk::Int64(view) => view.len(),
            ScalarChunk::Float(view) => view.len(),
            ScalarChunk::Double(view) => view.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element promoted to `f64` (bool maps to 0/1). Used by field-to-field
    /// comparison, which only binds numeric fields.
    pub fn get_f64(&self, i: usize) -> f64 {
        match self {
            ScalarChunk::Bool(view) => view[i] as u8 as f64,
            ScalarChunk::Int8(view) => view[i] as f64,
            ScalarChunk::Int16(view) => view[i] as f64,
            ScalarChunk::Int32(view) => view[i] as f64,
            ScalarChunk::Int64(view) => view[i] as f64,
            ScalarChunk::Float(view) => view[i] as f64,
            ScalarChunk::Double(view) => view[i],
        }
    }
}

/// A borrowed span of one vector column chunk, flattened row-major.
pub enum VectorChunk {
    Float { dim: usize, data: ChunkView<f32> },
    Binary { bytes_per_row: usize, data: ChunkView<u8> },
}

/// Growing-segment column: concurrent chunked storage tagged by type.
pub enum ColumnData {
    Bool(ConcurrentVector<bool>),
    Int8(ConcurrentVector<i8>),
    Int16(ConcurrentVector<i16>),
    Int32(ConcurrentVector<i32>),
    Int64(ConcurrentVector<i64>),
    Float(ConcurrentVector<f32>),
    Double(ConcurrentVector<f64>),
    FloatVector {
        dim: usize,
        data: ConcurrentVector<f32>,
    },
    BinaryVector {
        dim: usize,
        data: ConcurrentVector<u8>,
    },
}

impl ColumnData {
    /// Allocate an empty column for the field.
    pub fn from_field(meta: &FieldMeta, size_per_chunk: usize) -> Self {
        match meta.data_type {
            DataType::Bool => ColumnData::Bool(ConcurrentVector::new(size_per_chunk)),
            DataType::Int8 => ColumnData::Int8(ConcurrentVector::new(size_per_chunk)),
            DataType::Int16 => ColumnData::Int16(ConcurrentVector::new(size_per_chunk)),
            DataType::Int32 => ColumnData::Int32(ConcurrentVector::new(size_per_chunk)),
            DataType::Int64 => ColumnData::Int64(ConcurrentVector::new(size_per_chunk)),
            DataType::Float => ColumnData::Float(ConcurrentVector::new(size_per_chunk)),
            DataType::Double => ColumnData::Double(ConcurrentVector::new(size_per_chunk)),
            DataType::FloatVector { dim } => ColumnData::FloatVector {
                dim,
                data: ConcurrentVector::with_elements_per_row(dim, size_per_chunk),
            },
            DataType::BinaryVector { dim } => ColumnData::BinaryVector {
                dim,
                data: ConcurrentVector::with_elements_per_row(dim / 8, size_per_chunk),
            },
        }
    }

    /// Decode this column's slice out of each row blob and write the batch
    /// into rows `[row_begin, row_begin + rows.len())`. `byte_offset` is
    /// the field's position within a row.
    pub fn set_rows(&self, row_begin: usize, rows: &[&[u8]], byte_offset: usize) {
        match self {
            ColumnData::Bool(column) => {
                let buf: Vec<bool> = rows.iter().map(|row| row[byte_offset] != 0).collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Int8(column) => {
                let buf: Vec<i8> = rows.iter().map(|row| row[byte_offset] as i8).collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Int16(column) => {
                let buf: Vec<i16> = rows
                    .iter()
                    .map(|row| LittleEndian::read_i16(&row[byte_offset..]))
                    .collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Int32(column) => {
                let buf: Vec<i32> = rows
                    .iter()
                    .map(|row| LittleEndian::read_i32(&row[byte_offset..]))
                    .collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Int64(column) => {
                let buf: Vec<i64> = rows
                    .iter()
                    .map(|row| LittleEndian::read_i64(&row[byte_offset..]))
                    .collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Float(column) => {
                let buf: Vec<f32> = rows
                    .iter()
                    .map(|row| LittleEndian::read_f32(&row[byte_offset..]))
                    .collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::Double(column) => {
                let buf: Vec<f64> = rows
                    .iter()
                    .map(|row| LittleEndian::read_f64(&row[byte_offset..]))
                    .collect();
                column.set_data(row_begin, &buf);
            }
            ColumnData::FloatVector { dim, data } => {
                let mut buf = vec![0.0f32; rows.len() * dim];
                for (i, row) in rows.iter().enumerate() {
                    LittleEndian::read_f32_into(
                        &row[byte_offset..byte_offset + dim * 4],
                        &mut buf[i * dim..(i + 1) * dim],
                    );
                }
                data.set_data(row_begin, &buf);
            }
            ColumnData::BinaryVector { dim, data } => {
                let bytes = dim / 8;
                let mut buf = Vec::with_capacity(rows.len() * bytes);
                for row in rows {
                    buf.extend_from_slice(&row[byte_offset..byte_offset + bytes]);
                }
                data.set_data(row_begin, &buf);
            }
        }
    }

    /// Borrow one chunk of a scalar column.
    pub fn scalar_chunk(&self, chunk_id: usize) -> Result<ScalarChunk> {
        match self {
            ColumnData::Bool(column) => Ok(ScalarChunk::Bool(column.chunk_view(chunk_id))),
            ColumnData::Int8(column) => Ok(ScalarChunk::Int8(column.chunk_view(chunk_id))),
            ColumnData::Int16(column) => Ok(ScalarChunk::Int16(column.chunk_view(chunk_id))),
            ColumnData::Int32(column) => Ok(ScalarChunk::Int32(column.chunk_view(chunk_id))),
            ColumnData::Int64(column) => Ok(ScalarChunk::Int64(column.chunk_view(chunk_id))),
            ColumnData::Float(column) => Ok(ScalarChunk::Float(column.chunk_view(chunk_id))),
            ColumnData::Double(column) => Ok(ScalarChunk::Double(column.chunk_view(chunk_id))),
            _ => Err(LodestoneError::segment(
                "vector column has no scalar chunks",
            )),
        }
    }

    /// Borrow one chunk of a vector column.
    pub fn vector_chunk(&self, chunk_id: usize) -> Result<VectorChunk> {
        match self {
            ColumnData::FloatVector { dim, data } => Ok(VectorChunk::Float {
                dim: *dim,
                data: data.chunk_view(chunk_id),
            }),
            ColumnData::BinaryVector { dim, data } => Ok(VectorChunk::Binary {
                bytes_per_row: dim / 8,
                data: data.chunk_view(chunk_id),
            }),
            _ => Err(LodestoneError::segment(
                "scalar column has no vector chunks",
            )),
        }
    }

    /// Random-access gather. Offset `-1` produces a zeroed element.
    pub fn gather(&self, offsets: &[i64]) -> FieldColumn {
        fn scalars<T: Copy + Default + Send + Sync>(
            column: &ConcurrentVector<T>,
            offsets: &[i64],
        ) -> Arc<Vec<T>> {
            Arc::new(
                offsets
                    .iter()
                    .map(|&offset| {
                        if offset < 0 {
                            T::default()
                        } else {
                            column.get(offset as usize)
                        }
                    })
                    .collect(),
            )
        }

        fn vectors<T: Copy + Default + Send + Sync>(
            column: &ConcurrentVector<T>,
            offsets: &[i64],
        ) -> Arc<Vec<T>> {
            let width = column.elements_per_row();
            let mut out = Vec::with_capacity(offsets.len() * width);
            for &offset in offsets {
                if offset < 0 {
                    out.extend(std::iter::repeat(T::default()).take(width));
                } else {
                    out.extend_from_slice(&column.row_view(offset as usize));
                }
            }
            Arc::new(out)
        }

        match self {
            ColumnData::Bool(column) => FieldColumn::Bool(scalars(column, offsets)),
            ColumnData::Int8(column) => FieldColumn::Int8(scalars(column, offsets)),
            ColumnData::Int16(column) => FieldColumn::Int16(scalars(column, offsets)),
            ColumnData::Int32(column) => FieldColumn::Int32(scalars(column, offsets)),
            ColumnData::Int64(column) => FieldColumn::Int64(scalars(column, offsets)),
            ColumnData::Float(column) => FieldColumn::Float(scalars(column, offsets)),
            ColumnData::Double(column) => FieldColumn::Double(scalars(column, offsets)),
            ColumnData::FloatVector { dim, data } => FieldColumn::FloatVector {
                dim: *dim,
                data: vectors(data, offsets),
            },
            ColumnData::BinaryVector { dim, data } => FieldColumn::BinaryVector {
                dim: *dim,
                data: vectors(data, offsets),
            },
        }
    }

}

/// Owned single-chunk column data. Sealed segments store their fields as
/// `FieldColumn`s, and `bulk_subscript` returns one.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldColumn {
    Bool(Arc<Vec<bool>>),
    Int8(Arc<Vec<i8>>),
    Int16(Arc<Vec<i16>>),
    Int32(Arc<Vec<i32>>),
    Int64(Arc<Vec<i64>>),
    Float(Arc<Vec<f32>>),
    Double(Arc<Vec<f64>>),
    FloatVector { dim: usize, data: Arc<Vec<f32>> },
    BinaryVector { dim: usize, data: Arc<Vec<u8>> },
}

impl FieldColumn {
    /// Decode a little-endian column blob of `row_count` rows.
    pub fn from_blob(meta: &FieldMeta, row_count: usize, blob: &[u8]) -> Result<Self> {
        let expected = row_count * meta.sizeof();
        if blob.len() != expected {
            return Err(LodestoneError::segment(format!(
                "field '{}' blob is {} bytes, expected {} ({} rows of {})",
                meta.name,
                blob.len(),
                expected,
                row_count,
                meta.sizeof()
            )));
        }
        let column = match meta.data_type {
            DataType::Bool => {
                FieldColumn::Bool(Arc::new(blob.iter().map(|&b| b != 0).collect()))
            }
            DataType::Int8 => {
                FieldColumn::Int8(Arc::new(blob.iter().map(|&b| b as i8).collect()))
            }
            DataType::Int16 => {
                let mut data = vec![0i16; row_count];
                LittleEndian::read_i16_into(blob, &mut data);
                FieldColumn::Int16(Arc::new(data))
            }
            DataType::Int32 => {
                let mut data = vec![0i32; row_count];
                LittleEndian::read_i32_into(blob, &mut data);
                FieldColumn::Int32(Arc::new(data))
            }
            DataType::Int64 => {
                let mut data = vec![0i64; row_count];
                LittleEndian::read_i64_into(blob, &mut data);
                FieldColumn::Int64(Arc::new(data))
            }
            DataType::Float => {
                let mut data = vec![0.0f32; row_count];
                LittleEndian::read_f32_into(blob, &mut data);
                FieldColumn::Float(Arc::new(data))
            }
            DataType::Double => {
                let mut data = vec![0.0f64; row_count];
                LittleEndian::read_f64_into(blob, &mut data);
                FieldColumn::Double(Arc::new(data))
            }
            DataType::FloatVector { dim } => {
                let mut data = vec![0.0f32; row_count * dim];
                LittleEndian::read_f32_into(blob, &mut data);
                FieldColumn::FloatVector {
                    dim,
                    data: Arc::new(data),
                }
            }
            DataType::BinaryVector { dim } => FieldColumn::BinaryVector {
                dim,
                data: Arc::new(blob.to_vec()),
            },
        };
        Ok(column)
    }

    /// Encode back to the little-endian column blob.
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            FieldColumn::Bool(data) => data.iter().map(|&b| b as u8).collect(),
            FieldColumn::Int8(data) => data.iter().map(|&v| v as u8).collect(),
            FieldColumn::Int16(data) => {
                let mut out = vec![0u8; data.len() * 2];
                LittleEndian::write_i16_into(data, &mut out);
                out
            }
            FieldColumn::Int32(data) => {
                let mut out = vec![0u8; data.len() * 4];
                LittleEndian::write_i32_into(data, &mut out);
                out
            }
            FieldColumn::Int64(data) => {
                let mut out = vec![0u8; data.len() * 8];
                LittleEndian::write_i64_into(data, &mut out);
                out
            }
            FieldColumn::Float(data) => {
                let mut out = vec![0u8; data.len() * 4];
                LittleEndian::write_f32_into(data, &mut out);
                out
            }
            FieldColumn::Double(data) => {
                let mut out = vec![0u8; data.len() * 8];
                LittleEndian::write_f64_into(data, &mut out);
                out
            }
            FieldColumn::FloatVector { data, .. } => {
                let mut out = vec![0u8; data.len() * 4];
                LittleEndian::write_f32_into(data, &mut out);
                out
            }
            FieldColumn::BinaryVector { data, .. } => data.to_vec(),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            FieldColumn::Bool(_) => DataType::Bool,
            FieldColumn::Int8(_) => DataType::Int8,
            FieldColumn::Int16(_) => DataType::Int16,
            FieldColumn::Int32(_) => DataType::Int32,
            FieldColumn::Int64(_) => DataType::Int64,
            FieldColumn::Float(_) => DataType::Float,
            FieldColumn::Double(_) => DataType::Double,
            FieldColumn::FloatVector { dim, .. } => DataType::FloatVector { dim: *dim },
            FieldColumn::BinaryVector { dim, .. } => DataType::BinaryVector { dim: *dim },
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            FieldColumn::Bool(data) => data.len(),
            FieldColumn::Int8(data) => data.len(),
            FieldColumn::Int16(data) => data.len(),
            FieldColumn::Int32(data) => data.len(),
            FieldColumn::Int64(data) => data.len(),
            FieldColumn::Float(data) => data.len(),
            FieldColumn::Double(data) => data.len(),
            FieldColumn::FloatVector { dim, data } => data.len() / dim,
            FieldColumn::BinaryVector { dim, data } => data.len() / (dim / 8),
        }
    }

    /// Borrow the whole column as one scalar chunk.
    pub fn scalar_chunk(&self) -> Result<ScalarChunk> {
        match self {
            FieldColumn::Bool(data) => Ok(ScalarChunk::Bool(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Int8(data) => Ok(ScalarChunk::Int8(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Int16(data) => Ok(ScalarChunk::Int16(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Int32(data) => Ok(ScalarChunk::Int32(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Int64(data) => Ok(ScalarChunk::Int64(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Float(data) => Ok(ScalarChunk::Float(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            FieldColumn::Double(data) => Ok(ScalarChunk::Double(ChunkView::from_owned(
                Arc::clone(data),
                0,
                data.len(),
            ))),
            _ => Err(LodestoneError::segment(
                "vector column has no scalar chunks",
            )),
        }
    }

    /// Borrow the whole column as one vector chunk.
    pub fn vector_chunk(&self) -> Result<VectorChunk> {
        match self {
            FieldColumn::FloatVector { dim, data } => Ok(VectorChunk::Float {
                dim: *dim,
                data: ChunkView::from_owned(Arc::clone(data), 0, data.len()),
            }),
            FieldColumn::BinaryVector { dim, data } => Ok(VectorChunk::Binary {
                bytes_per_row: dim / 8,
                data: ChunkView::from_owned(Arc::clone(data), 0, data.len()),
            }),
            _ => Err(LodestoneError::segment(
                "scalar column has no vector chunks",
            )),
        }
    }

    /// Random-access gather. Offset `-1` produces a zeroed element.
    pub fn gather(&self, offsets: &[i64]) -> FieldColumn {
        fn scalars<T: Copy + Default>(data: &[T], offsets: &[i64]) -> Arc<Vec<T>> {
            Arc::new(
                offsets
                    .iter()
                    .map(|&offset| {
                        if offset < 0 {
                            T::default()
                        } else {
                            data[offset as usize]
                        }
                    })
                    .collect(),
            )
        }

        fn vectors<T: Copy + Default>(data: &[T], width: usize, offsets: &[i64]) -> Arc<Vec<T>> {
            let mut out = Vec::with_capacity(offsets.len() * width);
            for &offset in offsets {
                if offset < 0 {
                    out.extend(std::iter::repeat(T::default()).take(width));
                } else {
                    let start = offset as usize * width;
                    out.extend_from_slice(&data[start..start + width]);
                }
            }
            Arc::new(out)
        }

        match self {
            FieldColumn::Bool(data) => FieldColumn::Bool(scalars(data, offsets)),
            FieldColumn::Int8(data) => FieldColumn::Int8(scalars(data, offsets)),
            FieldColumn::Int16(data) => FieldColumn::Int16(scalars(data, offsets)),
            FieldColumn::Int32(data) => FieldColumn::Int32(scalars(data, offsets)),
            FieldColumn::Int64(data) => FieldColumn::Int64(scalars(data, offsets)),
            FieldColumn::Float(data) => FieldColumn::Float(scalars(data, offsets)),
            FieldColumn::Double(data) => FieldColumn::Double(scalars(data, offsets)),
            FieldColumn::FloatVector { dim, data } => FieldColumn::FloatVector {
                dim: *dim,
                data: vectors(data, *dim, offsets),
            },
            FieldColumn::BinaryVector { dim, data } => FieldColumn::BinaryVector {
                dim: *dim,
                data: vectors(data, dim / 8, offsets),
            },
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            FieldColumn::Bool(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_int64(&self) -> Option<&[i64]> {
        match self {
            FieldColumn::Int64(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match self {
            FieldColumn::Float(data) => Some(data),
            FieldColumn::FloatVector { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<&[f64]> {
        match self {
            FieldColumn::Double(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            FieldColumn::BinaryVector { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldId;

    fn int64_meta() -> FieldMeta {
        FieldMeta::new("pk", FieldId(100), DataType::Int64)
    }

    #[test]
    fn test_blob_round_trip() {
        let meta = int64_meta();
        let values = [3i64, -7, 42];
        let mut blob = vec![0u8; 24];
        LittleEndian::write_i64_into(&values, &mut blob);

        let column = FieldColumn::from_blob(&meta, 3, &blob).unwrap();
        assert_eq!(column.as_int64().unwrap(), &values);
        assert_eq!(column.to_blob(), blob);
    }

    #[test]
    fn test_blob_stride_checked() {
        let meta = int64_meta();
        assert!(FieldColumn::from_blob(&meta, 3, &[0u8; 23]).is_err());
    }

    #[test]
    fn test_gather_with_sentinel() {
        let column = FieldColumn::Int64(Arc::new(vec![10, 20, 30]));
        let gathered = column.gather(&[2, -1, 0]);
        assert_eq!(gathered.as_int64().unwrap(), &[30, 0, 10]);
    }

    #[test]
    fn test_vector_gather_with_sentinel() {
        let column = FieldColumn::FloatVector {
            dim: 2,
            data: Arc::new(vec![1.0, 2.0, 3.0, 4.0]),
        };
        let gathered = column.gather(&[1, -1]);
        assert_eq!(gathered.as_float().unwrap(), &[3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_growing_column_set_rows() {
        let meta = FieldMeta::new("vec", FieldId(101), DataType::FloatVector { dim: 2 });
        let column = ColumnData::from_field(&meta, 4);

        // Two rows, the field sitting after an 8-byte prefix.
        let mut row0 = vec![0u8; 16];
        LittleEndian::write_f32_into(&[1.0, 2.0], &mut row0[8..]);
        let mut row1 = vec![0u8; 16];
        LittleEndian::write_f32_into(&[3.0, 4.0], &mut row1[8..]);

        column.set_rows(0, &[&row0, &row1], 8);
        match column.vector_chunk(0).unwrap() {
            VectorChunk::Float { dim, data } => {
                assert_eq!(dim, 2);
                assert_eq!(&data[..4], &[1.0, 2.0, 3.0, 4.0]);
            }
            _ => panic!("expected float chunk"),
        }
    }
}
