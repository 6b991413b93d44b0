//! Schema: the ordered field list of a collection's segments.
//!
//! Field position in the list is the [`FieldOffset`]; the stable external
//! identifier is the [`FieldId`]. Both, along with the field name, resolve
//! in O(1) after the schema is built.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{LodestoneError, Result};
use crate::schema::field::{DataType, FieldId, FieldMeta, FieldOffset};

/// An immutable, validated schema.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldMeta>,
    /// Byte offset of each field within a row blob, in schema order.
    byte_offsets: Vec<usize>,
    name_offsets: AHashMap<String, FieldOffset>,
    id_offsets: AHashMap<FieldId, FieldOffset>,
    total_sizeof: usize,
    primary_key: Option<FieldOffset>,
}

impl Schema {
    /// Build a schema from descriptors and an optional primary-key field
    /// name. The primary key must be an `int64` field.
    pub fn from_fields(fields: Vec<FieldMeta>, primary_key: Option<&str>) -> Result<Self> {
        if fields.is_empty() {
            return Err(LodestoneError::schema("schema must have at least one field"));
        }

        let mut name_offsets = AHashMap::with_capacity(fields.len());
        let mut id_offsets = AHashMap::with_capacity(fields.len());
        let mut byte_offsets = Vec::with_capacity(fields.len());
        let mut total_sizeof = 0usize;

        for (position, field) in fields.iter().enumerate() {
            field.validate()?;
            let offset = FieldOffset(position);
            if name_offsets.insert(field.name.clone(), offset).is_some() {
                return Err(LodestoneError::schema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
            if id_offsets.insert(field.id, offset).is_some() {
                return Err(LodestoneError::schema(format!(
                    "duplicate field id {}",
                    field.id.0
                )));
            }
            byte_offsets.push(total_sizeof);
            total_sizeof += field.sizeof();
        }

        let primary_key = match primary_key {
            None => None,
            Some(name) => {
                let offset = *name_offsets.get(name).ok_or_else(|| {
                    LodestoneError::schema(format!("primary key field '{name}' does not exist"))
                })?;
                if fields[offset.0].data_type != DataType::Int64 {
                    return Err(LodestoneError::schema(format!(
                        "primary key field '{name}' must be int64"
                    )));
                }
                Some(offset)
            }
        };

        Ok(Self {
            fields,
            byte_offsets,
            name_offsets,
            id_offsets,
            total_sizeof,
            primary_key,
        })
    }

    /// Deserialize from the JSON schema record.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: SchemaRecord = serde_json::from_str(json)?;
        Self::from_fields(record.fields, record.primary_key.as_deref())
    }

    /// Serialize to the JSON schema record.
    pub fn to_json(&self) -> Result<String> {
        let record = SchemaRecord {
            fields: self.fields.clone(),
            primary_key: self
                .primary_key
                .map(|offset| self.fields[offset.0].name.clone()),
        };
        Ok(serde_json::to_string(&record)?)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field descriptor at the given offset. Panics on out-of-range
    /// offsets; offsets come from this schema's own lookups.
    pub fn field(&self, offset: FieldOffset) -> &FieldMeta {
        &self.fields[offset.0]
    }

    /// All descriptors in schema order.
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Offset of the field with the given name.
    pub fn offset_of_name(&self, name: &str) -> Result<FieldOffset> {
        self.name_offsets.get(name).copied().ok_or_else(|| {
            LodestoneError::schema(format!("field '{name}' does not exist"))
        })
    }

    /// Offset of the field with the given id.
    pub fn offset_of_id(&self, id: FieldId) -> Result<FieldOffset> {
        self.id_offsets.get(&id).copied().ok_or_else(|| {
            LodestoneError::schema(format!("field id {} does not exist", id.0))
        })
    }

    /// Byte offset of a field within a row blob.
    pub fn byte_offset(&self, offset: FieldOffset) -> usize {
        self.byte_offsets[offset.0]
    }

    /// Row stride of the insert blob: sum of all field sizes.
    pub fn total_sizeof(&self) -> usize {
        self.total_sizeof
    }

    /// Offset of the primary-key field, if declared.
    pub fn primary_key_offset(&self) -> Option<FieldOffset> {
        self.primary_key
    }
}

/// The serde-facing schema record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaRecord {
    fields: Vec<FieldMeta>,
    #[serde(default)]
    primary_key: Option<String>,
}

/// Incremental schema construction with auto-assigned field ids.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldMeta>,
    primary_key: Option<String>,
    next_id: Option<i64>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field with an auto-assigned id (starting at
    /// [`FieldId::START_USER_ID`]).
    pub fn add_field<S: Into<String>>(mut self, name: S, data_type: DataType) -> Self {
        let id = self.next_id.unwrap_or(FieldId::START_USER_ID);
        self.next_id = Some(id + 1);
        self.fields.push(FieldMeta::new(name, FieldId(id), data_type));
        self
    }

    /// Add a field with an explicit id. Later auto-assigned ids continue
    /// after the largest id seen.
    pub fn add_field_with_id<S: Into<String>>(
        mut self,
        name: S,
        id: FieldId,
        data_type: DataType,
    ) -> Self {
        let next = self.next_id.unwrap_or(FieldId::START_USER_ID).max(id.0 + 1);
        self.next_id = Some(next);
        self.fields.push(FieldMeta::new(name, id, data_type));
        self
    }

    /// Declare the primary-key field by name.
    pub fn primary_key<S: Into<String>>(mut self, name: S) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Schema> {
        Schema::from_fields(self.fields, self.primary_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        SchemaBuilder::new()
            .add_field("pk", DataType::Int64)
            .add_field("tag", DataType::Int64)
            .add_field("vec", DataType::FloatVector { dim: 4 })
            .primary_key("pk")
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup() {
        let schema = sample_schema();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.offset_of_name("vec").unwrap(), FieldOffset(2));
        assert_eq!(schema.offset_of_id(FieldId(101)).unwrap(), FieldOffset(1));
        assert_eq!(schema.primary_key_offset(), Some(FieldOffset(0)));
        assert!(schema.offset_of_name("missing").is_err());
    }

    #[test]
    fn test_row_layout() {
        let schema = sample_schema();
        assert_eq!(schema.total_sizeof(), 8 + 8 + 16);
        assert_eq!(schema.byte_offset(FieldOffset(0)), 0);
        assert_eq!(schema.byte_offset(FieldOffset(1)), 8);
        assert_eq!(schema.byte_offset(FieldOffset(2)), 16);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = SchemaBuilder::new()
            .add_field("a", DataType::Int64)
            .add_field("a", DataType::Int32)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_primary_key_must_be_int64() {
        let result = SchemaBuilder::new()
            .add_field("pk", DataType::Float)
            .primary_key("pk")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let schema = sample_schema();
        let json = schema.to_json().unwrap();
        let restored = Schema::from_json(&json).unwrap();
        assert_eq!(restored.len(), schema.len());
        assert_eq!(restored.total_sizeof(), schema.total_sizeof());
        assert_eq!(restored.primary_key_offset(), schema.primary_key_offset());
    }
}
