//! Field descriptors for segment schemas.

use serde::{Deserialize, Serialize};

use crate::error::{LodestoneError, Result};

/// Stable external identifier of a field.
///
/// Ids below [`FieldId::START_USER_ID`] are reserved for system fields;
/// today the only system field is [`FieldId::ROW_ID`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FieldId(pub i64);

impl FieldId {
    /// The reserved system field carrying per-row ids.
    pub const ROW_ID: FieldId = FieldId(0);

    /// First id available to user fields.
    pub const START_USER_ID: i64 = 100;

    /// Whether this id names a system field.
    pub fn is_system(&self) -> bool {
        self.0 < Self::START_USER_ID
    }
}

/// Position of a field in schema order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FieldOffset(pub usize);

/// Data type of a field. All element types are fixed-size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    /// Dense float vector of `dim` components.
    FloatVector { dim: usize },
    /// Binary vector of `dim` bits; `dim` must be a multiple of 8.
    BinaryVector { dim: usize },
}

impl DataType {
    /// Bytes occupied by one row of this type.
    pub fn sizeof(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double => 8,
            DataType::FloatVector { dim } => dim * 4,
            DataType::BinaryVector { dim } => dim / 8,
        }
    }

    /// Whether this is a vector type.
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            DataType::FloatVector { .. } | DataType::BinaryVector { .. }
        )
    }

    /// Vector dimensionality, if any.
    pub fn dim(&self) -> Option<usize> {
        match self {
            DataType::FloatVector { dim } | DataType::BinaryVector { dim } => Some(*dim),
            _ => None,
        }
    }

    /// Get the name of this data type.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::FloatVector { .. } => "float_vector",
            DataType::BinaryVector { .. } => "binary_vector",
        }
    }
}

/// A field descriptor: name, stable id, and data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub id: FieldId,
    pub data_type: DataType,
}

impl FieldMeta {
    pub fn new<S: Into<String>>(name: S, id: FieldId, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            id,
            data_type,
        }
    }

    /// Bytes occupied by one row of this field.
    pub fn sizeof(&self) -> usize {
        self.data_type.sizeof()
    }

    pub fn is_vector(&self) -> bool {
        self.data_type.is_vector()
    }

    /// Validate the descriptor in isolation.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(LodestoneError::schema("field name cannot be empty"));
        }
        if self.id.is_system() {
            return Err(LodestoneError::schema(format!(
                "field '{}' uses reserved id {}",
                self.name, self.id.0
            )));
        }
        match self.data_type {
            DataType::FloatVector { dim } if dim == 0 => Err(LodestoneError::schema(format!(
                "float vector field '{}' must have dim > 0",
                self.name
            ))),
            DataType::BinaryVector { dim } if dim == 0 || dim % 8 != 0 => {
                Err(LodestoneError::schema(format!(
                    "binary vector field '{}' must have dim > 0 and dim % 8 == 0",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}
