//! Error types for the model crate.

use crate::key::RecordType;
use thiserror::Error;

/// Result type for model conversions.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while converting between entities and remote records.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A required field is absent from the record.
    #[error("{record_type} record is missing field `{field}`")]
    MissingField {
        /// Type of the record being decoded.
        record_type: RecordType,
        /// Name of the missing field.
        field: String,
    },

    /// A field holds a value of the wrong kind.
    #[error("field `{field}` has wrong type: expected {expected}")]
    WrongType {
        /// Name of the offending field.
        field: String,
        /// Kind of value that was expected.
        expected: &'static str,
    },

    /// A record of one type was handed to the decoder of another.
    #[error("expected {expected} record, got {actual}")]
    TypeMismatch {
        /// Type the decoder handles.
        expected: RecordType,
        /// Type found on the record.
        actual: RecordType,
    },

    /// Unknown remote type tag.
    #[error("unknown record type tag: {0}")]
    UnknownType(String),

    /// The embedded set list could not be encoded or decoded.
    #[error("embedded set list: {0}")]
    EmbeddedSets(String),
}

impl ModelError {
    /// Creates a missing-field error.
    pub fn missing(record_type: RecordType, field: impl Into<String>) -> Self {
        Self::MissingField {
            record_type,
            field: field.into(),
        }
    }
}
