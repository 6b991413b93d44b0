//! Schema module: typed field descriptors and the ordered field list.

pub mod field;
#[allow(clippy::module_inception)]
pub mod schema;

pub use field::{DataType, FieldId, FieldMeta, FieldOffset};
pub use schema::{Schema, SchemaBuilder};
