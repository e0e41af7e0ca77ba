//! # liftsync model
//!
//! Data types shared by the liftsync engine and its collaborators.
//!
//! This crate provides:
//! - Workout entities (`Split` → `Day` → `Exercise` → `SetEntry`) and the
//!   append-only history types (`DayStorage`, `WeightPoint`)
//! - The remote `Record` shape: an untyped field map plus named reference
//!   lists pointing at child records
//! - Entity ⇄ record conversion via [`RecordCodec`]
//! - [`LocalSnapshot`], the immutable view of local data handed to the engine
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entity;
mod error;
mod key;
mod record;
mod snapshot;

pub use codec::{decode_sets, encode_sets, RecordCodec, DAYS_REF, EXERCISES_REF, IMAGE_FIELD};
pub use entity::{
    AssetRef, Day, DayStorage, Exercise, ProgressPhoto, SetEntry, Split, UserProfile, WeightPoint,
    PROFILE_KEY,
};
pub use error::{ModelError, ModelResult};
pub use key::{EntityKey, RecordId, RecordType};
pub use record::{FieldValue, Record, Reference};
pub use snapshot::LocalSnapshot;
