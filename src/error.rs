//! Error types for the lodestone library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`LodestoneError`] enum. Variants separate caller contract violations
//! (bad schema, malformed plan, mismatched loads) from internal faults, so
//! an embedding layer can map them onto its own status codes.

use anyhow;
use thiserror::Error;

/// The main error type for lodestone operations.
#[derive(Error, Debug)]
pub enum LodestoneError {
    /// Schema-related errors (unknown field, duplicate field, bad dimension).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Segment-related errors (bad row stride, row-count mismatch, load conflicts).
    #[error("Segment error: {0}")]
    Segment(String),

    /// Query-related errors (malformed plan, bad placeholder group).
    #[error("Query error: {0}")]
    Query(String),

    /// Index-related errors (row-count mismatch, unsupported input).
    #[error("Index error: {0}")]
    Index(String),

    /// Invalid operation for the current segment state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Resource exhausted (allocation failure while growing a column).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unimplemented path (unknown data type or metric).
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// JSON serialization/deserialization errors (plan DSL, index params).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with LodestoneError.
pub type Result<T> = std::result::Result<T, LodestoneError>;

impl LodestoneError {
    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        LodestoneError::Schema(msg.into())
    }

    /// Create a new segment error.
    pub fn segment<S: Into<String>>(msg: S) -> Self {
        LodestoneError::Segment(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        LodestoneError::Query(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        LodestoneError::Index(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        LodestoneError::InvalidOperation(msg.into())
    }

    /// Create a new resource exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        LodestoneError::ResourceExhausted(msg.into())
    }

    /// Create a new not implemented error.
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        LodestoneError::NotImplemented(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = LodestoneError::schema("unknown field 'foo'");
        assert_eq!(error.to_string(), "Schema error: unknown field 'foo'");

        let error = LodestoneError::segment("row stride mismatch");
        assert_eq!(error.to_string(), "Segment error: row stride mismatch");

        let error = LodestoneError::query("empty vector clause");
        assert_eq!(error.to_string(), "Query error: empty vector clause");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = LodestoneError::from(json_error);

        match error {
            LodestoneError::Json(_) => {}
            _ => panic!("Expected JSON error variant"),
        }
    }
}
