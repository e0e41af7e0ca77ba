//! Remote record representation.

use crate::error::{ModelError, ModelResult};
use crate::key::{EntityKey, RecordId, RecordType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamic field value stored on a remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string.
    Text(String),
    /// Byte string (embedded CBOR, image payloads).
    Bytes(Vec<u8>),
    /// Point in time.
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(n) => Some(*n),
            FieldValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a timestamp, if it is one.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Float(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(t)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// A typed pointer from one record to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// The referenced record.
    pub target: RecordId,
    /// Deleting the owning record also deletes the target.
    pub cascade_delete: bool,
}

impl Reference {
    /// Creates a reference that cascades deletes from the owner.
    pub fn owned(target: RecordId) -> Self {
        Self {
            target,
            cascade_delete: true,
        }
    }
}

/// A keyed record in the remote store.
///
/// Scalar data lives in `fields`; links to child records live in named
/// reference lists. The remote store rejects a save whose references point
/// at records it does not hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record address.
    pub id: RecordId,
    /// Scalar fields.
    pub fields: BTreeMap<String, FieldValue>,
    /// Named reference lists.
    pub references: BTreeMap<String, Vec<Reference>>,
}

impl Record {
    /// Creates an empty record.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// Returns the record type.
    pub fn record_type(&self) -> RecordType {
        self.id.record_type
    }

    /// Returns the entity key.
    pub fn key(&self) -> &EntityKey {
        &self.id.key
    }

    /// Sets a field, returning self for chaining.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a field.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Gets a raw field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Replaces a reference list.
    pub fn set_references(&mut self, name: &str, references: Vec<Reference>) {
        self.references.insert(name.to_string(), references);
    }

    /// Returns a reference list, empty when absent.
    pub fn references(&self, name: &str) -> &[Reference] {
        self.references.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the keys referenced by a reference list, in order.
    pub fn referenced_keys(&self, name: &str) -> Vec<EntityKey> {
        self.references(name)
            .iter()
            .map(|r| r.target.key.clone())
            .collect()
    }

    /// Iterates over every referenced record ID.
    pub fn all_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values().flatten()
    }

    /// Overwrites this record's fields and references with those of `other`.
    ///
    /// Fields absent from `other` are kept; this is the "apply current field
    /// values" step of an upsert.
    pub fn apply(&mut self, other: &Record) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
        for (name, refs) in &other.references {
            self.references.insert(name.clone(), refs.clone());
        }
    }

    fn required(&self, name: &str) -> ModelResult<&FieldValue> {
        match self.fields.get(name) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(ModelError::missing(self.record_type(), name)),
        }
    }

    fn wrong(name: &str, expected: &'static str) -> ModelError {
        ModelError::WrongType {
            field: name.to_string(),
            expected,
        }
    }

    /// Reads a required text field.
    pub fn text(&self, name: &str) -> ModelResult<String> {
        self.required(name)?
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| Self::wrong(name, "text"))
    }

    /// Reads a text field, defaulting to an empty string when absent.
    pub fn text_or_default(&self, name: &str) -> ModelResult<String> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => Ok(String::new()),
            Some(_) => self.text(name),
        }
    }

    /// Reads a required integer field.
    pub fn integer(&self, name: &str) -> ModelResult<i64> {
        self.required(name)?
            .as_integer()
            .ok_or_else(|| Self::wrong(name, "integer"))
    }

    /// Reads a required float field.
    pub fn float(&self, name: &str) -> ModelResult<f64> {
        self.required(name)?
            .as_float()
            .ok_or_else(|| Self::wrong(name, "float"))
    }

    /// Reads an optional float field.
    pub fn float_opt(&self, name: &str) -> ModelResult<Option<f64>> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(_) => self.float(name).map(Some),
        }
    }

    /// Reads a boolean field, defaulting to `false` when absent.
    pub fn flag(&self, name: &str) -> ModelResult<bool> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => Ok(false),
            Some(value) => value.as_bool().ok_or_else(|| Self::wrong(name, "bool")),
        }
    }

    /// Reads a required timestamp field.
    pub fn timestamp(&self, name: &str) -> ModelResult<DateTime<Utc>> {
        self.required(name)?
            .as_timestamp()
            .ok_or_else(|| Self::wrong(name, "timestamp"))
    }

    /// Reads an optional timestamp field.
    pub fn timestamp_opt(&self, name: &str) -> ModelResult<Option<DateTime<Utc>>> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(_) => self.timestamp(name).map(Some),
        }
    }

    /// Reads a required byte-string field.
    pub fn bytes(&self, name: &str) -> ModelResult<&[u8]> {
        self.required(name)?
            .as_bytes()
            .ok_or_else(|| Self::wrong(name, "bytes"))
    }

    /// Reads an optional byte-string field.
    pub fn bytes_opt(&self, name: &str) -> ModelResult<Option<&[u8]>> {
        match self.fields.get(name) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(_) => self.bytes(name).map(Some),
        }
    }
}
