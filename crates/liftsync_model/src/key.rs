//! Entity keys and remote record addressing.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier for an entity.
///
/// Keys are UUIDs rendered as strings. The same key addresses the entity
/// locally and names its record in the remote store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Creates a new random key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing key string.
    pub fn from_string(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self.0)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Type of a remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Training program (composite root).
    Split,
    /// Training day inside a split.
    Day,
    /// Exercise inside a day, carrying its sets embedded.
    Exercise,
    /// History entry for one calendar date.
    DayStorage,
    /// Body-weight measurement.
    WeightPoint,
    /// The account's single profile record.
    UserProfile,
    /// Progress photo with its image payload.
    ProgressPhoto,
}

impl RecordType {
    /// All record types, in the order they are pulled during a merge.
    pub const ALL: [RecordType; 7] = [
        RecordType::Split,
        RecordType::Day,
        RecordType::Exercise,
        RecordType::DayStorage,
        RecordType::WeightPoint,
        RecordType::UserProfile,
        RecordType::ProgressPhoto,
    ];

    /// Returns the remote type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            RecordType::Split => "Split",
            RecordType::Day => "Day",
            RecordType::Exercise => "Exercise",
            RecordType::DayStorage => "DayStorage",
            RecordType::WeightPoint => "WeightPoint",
            RecordType::UserProfile => "UserProfile",
            RecordType::ProgressPhoto => "ProgressPhoto",
        }
    }

    /// Returns true for types that are inserted once and never updated.
    pub fn is_append_only(&self) -> bool {
        matches!(
            self,
            RecordType::DayStorage | RecordType::WeightPoint | RecordType::ProgressPhoto
        )
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RecordType {
    type Err = ModelError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| ModelError::UnknownType(tag.to_string()))
    }
}

/// Address of a record in the remote store: `(type, key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Record type.
    pub record_type: RecordType,
    /// Entity key.
    pub key: EntityKey,
}

impl RecordId {
    /// Creates a record ID.
    pub fn new(record_type: RecordType, key: impl Into<EntityKey>) -> Self {
        Self {
            record_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.key)
    }
}
