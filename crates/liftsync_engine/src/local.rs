//! Local-side collaborators: the on-device store and the asset store.
//!
//! The engine never edits local data from its concurrent save tasks. It
//! reads a [`LocalSnapshot`] and describes the changes it wants as
//! [`LocalMutation`]s, which the coordinator applies on one sequence.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use liftsync_model::{
    AssetRef, Day, DayStorage, EntityKey, Exercise, LocalSnapshot, ProgressPhoto, RecordType,
    Split, UserProfile, WeightPoint,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Scalar fields of a split copied from a newer remote copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitFields {
    /// Display name.
    pub name: String,
    /// Active flag.
    pub is_active: bool,
    /// Start date.
    pub start_date: Option<DateTime<Utc>>,
    /// Mutation clock.
    pub updated_at: DateTime<Utc>,
}

impl From<&Split> for SplitFields {
    fn from(split: &Split) -> Self {
        Self {
            name: split.name.clone(),
            is_active: split.is_active,
            start_date: split.start_date,
            updated_at: split.updated_at,
        }
    }
}

/// Scalar fields of a day copied from a newer remote copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayFields {
    /// Display name.
    pub name: String,
    /// Position inside the split.
    pub order_index: i64,
    /// Calendar label.
    pub calendar_label: String,
    /// Mutation clock.
    pub updated_at: DateTime<Utc>,
}

impl From<&Day> for DayFields {
    fn from(day: &Day) -> Self {
        Self {
            name: day.name.clone(),
            order_index: day.order_index,
            calendar_label: day.calendar_label.clone(),
            updated_at: day.updated_at,
        }
    }
}

/// A change to local data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LocalMutation {
    /// Adds a split. Its days arrive as separate `InsertDay` mutations.
    InsertSplit(Split),
    /// Overwrites a split's scalar fields; its days are untouched.
    UpdateSplit {
        /// Split to update.
        key: EntityKey,
        /// New field values.
        fields: SplitFields,
    },
    /// Adds a day under a split.
    InsertDay {
        /// Owning split.
        split: EntityKey,
        /// The day, without exercises.
        day: Day,
    },
    /// Overwrites a day's scalar fields; its exercises are untouched.
    UpdateDay {
        /// Day to update.
        key: EntityKey,
        /// New field values.
        fields: DayFields,
    },
    /// Adds an exercise under a day.
    InsertExercise {
        /// Owning day.
        day: EntityKey,
        /// The exercise with its sets.
        exercise: Exercise,
    },
    /// Replaces an exercise, sets included.
    UpdateExercise(Exercise),
    /// Makes one split active and every other split inactive.
    SetActiveSplit(EntityKey),
    /// Adds a history entry.
    InsertDayStorage(DayStorage),
    /// Removes a history entry.
    DeleteDayStorage(EntityKey),
    /// Adds a weight measurement.
    InsertWeightPoint(WeightPoint),
    /// Creates or replaces the profile.
    UpsertProfile(UserProfile),
    /// Adds progress photo metadata.
    InsertProgressPhoto(ProgressPhoto),
}

impl LocalMutation {
    /// Record type the mutation belongs to, used to group commits.
    pub fn record_type(&self) -> RecordType {
        match self {
            LocalMutation::InsertSplit(_)
            | LocalMutation::UpdateSplit { .. }
            | LocalMutation::SetActiveSplit(_) => RecordType::Split,
            LocalMutation::InsertDay { .. } | LocalMutation::UpdateDay { .. } => RecordType::Day,
            LocalMutation::InsertExercise { .. } | LocalMutation::UpdateExercise(_) => {
                RecordType::Exercise
            }
            LocalMutation::InsertDayStorage(_) | LocalMutation::DeleteDayStorage(_) => {
                RecordType::DayStorage
            }
            LocalMutation::InsertWeightPoint(_) => RecordType::WeightPoint,
            LocalMutation::UpsertProfile(_) => RecordType::UserProfile,
            LocalMutation::InsertProgressPhoto(_) => RecordType::ProgressPhoto,
        }
    }

    /// Applies the mutation to a snapshot.
    ///
    /// Inserts of keys that already exist are ignored, so replaying a plan
    /// is harmless. Updates of unknown keys and inserts under unknown
    /// parents are errors.
    pub fn apply_to(&self, snapshot: &mut LocalSnapshot) -> SyncResult<()> {
        match self {
            LocalMutation::InsertSplit(split) => {
                if snapshot.find_split(&split.key).is_none() {
                    snapshot.splits.push(split.clone());
                }
            }
            LocalMutation::UpdateSplit { key, fields } => {
                let split = split_mut(snapshot, key)?;
                split.name = fields.name.clone();
                split.is_active = fields.is_active;
                split.start_date = fields.start_date;
                split.updated_at = fields.updated_at;
            }
            LocalMutation::InsertDay { split, day } => {
                if snapshot.find_day(&day.key).is_none() {
                    let parent = split_mut(snapshot, split)?;
                    parent.days.push(day.clone());
                    parent.days.sort_by_key(|d| d.order_index);
                }
            }
            LocalMutation::UpdateDay { key, fields } => {
                let day = day_mut(snapshot, key)?;
                day.name = fields.name.clone();
                day.order_index = fields.order_index;
                day.calendar_label = fields.calendar_label.clone();
                day.updated_at = fields.updated_at;
            }
            LocalMutation::InsertExercise { day, exercise } => {
                if snapshot.find_exercise(&exercise.key).is_none() {
                    let parent = day_mut(snapshot, day)?;
                    parent.exercises.push(exercise.clone());
                    parent.exercises.sort_by_key(|e| e.order_index);
                }
            }
            LocalMutation::UpdateExercise(exercise) => {
                let existing = snapshot
                    .splits
                    .iter_mut()
                    .flat_map(|s| s.days.iter_mut())
                    .flat_map(|d| d.exercises.iter_mut())
                    .find(|e| e.key == exercise.key)
                    .ok_or_else(|| missing("exercise", &exercise.key))?;
                *existing = exercise.clone();
            }
            LocalMutation::SetActiveSplit(key) => {
                if snapshot.find_split(key).is_none() {
                    return Err(missing("split", key));
                }
                for split in &mut snapshot.splits {
                    split.is_active = &split.key == key;
                }
            }
            LocalMutation::InsertDayStorage(entry) => {
                if !snapshot.day_storage.iter().any(|h| h.key == entry.key) {
                    snapshot.day_storage.push(entry.clone());
                }
            }
            LocalMutation::DeleteDayStorage(key) => {
                snapshot.day_storage.retain(|h| &h.key != key);
            }
            LocalMutation::InsertWeightPoint(point) => {
                if !snapshot.weight_points.iter().any(|w| w.key == point.key) {
                    snapshot.weight_points.push(point.clone());
                }
            }
            LocalMutation::UpsertProfile(profile) => {
                snapshot.profile = Some(profile.clone());
            }
            LocalMutation::InsertProgressPhoto(photo) => {
                if !snapshot.photos.iter().any(|p| p.key == photo.key) {
                    snapshot.photos.push(photo.clone());
                }
            }
        }
        Ok(())
    }
}

fn missing(kind: &str, key: &EntityKey) -> SyncError {
    SyncError::Storage(format!("local {kind} {key} not found"))
}

fn split_mut<'a>(snapshot: &'a mut LocalSnapshot, key: &EntityKey) -> SyncResult<&'a mut Split> {
    snapshot
        .splits
        .iter_mut()
        .find(|s| &s.key == key)
        .ok_or_else(|| missing("split", key))
}

fn day_mut<'a>(snapshot: &'a mut LocalSnapshot, key: &EntityKey) -> SyncResult<&'a mut Day> {
    snapshot
        .splits
        .iter_mut()
        .flat_map(|s| s.days.iter_mut())
        .find(|d| &d.key == key)
        .ok_or_else(|| missing("day", key))
}

/// The on-device store.
///
/// Implementations serialize their own writes. The engine only calls it
/// from one logical sequence at a time.
pub trait LocalStore: Send + Sync {
    /// Returns a copy of the committed data.
    fn snapshot(&self) -> SyncResult<LocalSnapshot>;

    /// Stages one mutation.
    fn apply(&self, mutation: &LocalMutation) -> SyncResult<()>;

    /// Makes staged mutations durable.
    fn commit(&self) -> SyncResult<()>;

    /// Drops staged mutations without committing them.
    fn discard(&self);
}

#[derive(Default)]
struct LocalState {
    committed: LocalSnapshot,
    staged: Option<LocalSnapshot>,
    commits: usize,
}

/// In-memory [`LocalStore`] with explicit staging.
#[derive(Default)]
pub struct MemoryLocalStore {
    state: Mutex<LocalState>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `snapshot`.
    pub fn with_snapshot(snapshot: LocalSnapshot) -> Self {
        Self {
            state: Mutex::new(LocalState {
                committed: snapshot,
                staged: None,
                commits: 0,
            }),
        }
    }

    /// Number of commits performed.
    pub fn commit_count(&self) -> usize {
        self.state.lock().commits
    }

    /// Returns true if mutations are staged but not committed.
    pub fn has_staged(&self) -> bool {
        self.state.lock().staged.is_some()
    }
}

impl LocalStore for MemoryLocalStore {
    fn snapshot(&self) -> SyncResult<LocalSnapshot> {
        Ok(self.state.lock().committed.clone())
    }

    fn apply(&self, mutation: &LocalMutation) -> SyncResult<()> {
        let mut state = self.state.lock();
        let mut staged = match state.staged.take() {
            Some(staged) => staged,
            None => state.committed.clone(),
        };
        let result = mutation.apply_to(&mut staged);
        state.staged = Some(staged);
        result
    }

    fn commit(&self) -> SyncResult<()> {
        let mut state = self.state.lock();
        if let Some(staged) = state.staged.take() {
            state.committed = staged;
            state.commits += 1;
        }
        Ok(())
    }

    fn discard(&self) {
        self.state.lock().staged = None;
    }
}

/// Store for binary payloads such as images.
pub trait AssetStore: Send + Sync {
    /// Reads an asset.
    fn load(&self, asset: &AssetRef) -> SyncResult<Vec<u8>>;

    /// Stores bytes and returns a reference to them.
    fn persist(&self, bytes: &[u8]) -> SyncResult<AssetRef>;
}

/// In-memory [`AssetStore`].
#[derive(Default)]
pub struct MemoryAssetStore {
    assets: Mutex<HashMap<AssetRef, Vec<u8>>>,
}

impl MemoryAssetStore {
    /// Creates an empty asset store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes under a caller-chosen reference, replacing any existing payload.
    pub fn insert(&self, asset: AssetRef, bytes: Vec<u8>) {
        self.assets.lock().insert(asset, bytes);
    }

    /// Number of stored assets.
    pub fn len(&self) -> usize {
        self.assets.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.assets.lock().is_empty()
    }
}

impl AssetStore for MemoryAssetStore {
    fn load(&self, asset: &AssetRef) -> SyncResult<Vec<u8>> {
        self.assets
            .lock()
            .get(asset)
            .cloned()
            .ok_or_else(|| SyncError::Storage(format!("asset {} not found", asset.as_str())))
    }

    fn persist(&self, bytes: &[u8]) -> SyncResult<AssetRef> {
        let asset = AssetRef(format!("asset-{}", EntityKey::new()));
        self.assets.lock().insert(asset.clone(), bytes.to_vec());
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemoryLocalStore, Split) {
        let split = Split::new("PPL").with_day(Day::new("Push", 0));
        let store = MemoryLocalStore::with_snapshot(LocalSnapshot {
            splits: vec![split.clone()],
            ..LocalSnapshot::default()
        });
        (store, split)
    }

    #[test]
    fn staged_changes_invisible_until_commit() {
        let (store, split) = seeded();
        let day = Day::new("Pull", 1);

        store
            .apply(&LocalMutation::InsertDay {
                split: split.key.clone(),
                day: day.clone(),
            })
            .unwrap();
        assert!(store.has_staged());
        assert_eq!(store.snapshot().unwrap().splits[0].days.len(), 1);

        store.commit().unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.splits[0].days.len(), 2);
        assert_eq!(snapshot.splits[0].days[1].key, day.key);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn discard_drops_staged_changes() {
        let (store, split) = seeded();
        store
            .apply(&LocalMutation::InsertDay {
                split: split.key.clone(),
                day: Day::new("Pull", 1),
            })
            .unwrap();
        store.discard();
        assert!(!store.has_staged());

        store.commit().unwrap();
        assert_eq!(store.snapshot().unwrap().splits[0].days.len(), 1);
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn set_active_is_exclusive() {
        let mut snapshot = LocalSnapshot {
            splits: vec![Split::new("A"), Split::new("B"), Split::new("C")],
            ..LocalSnapshot::default()
        };
        snapshot.splits[0].is_active = true;
        let target = snapshot.splits[2].key.clone();

        LocalMutation::SetActiveSplit(target.clone())
            .apply_to(&mut snapshot)
            .unwrap();

        assert_eq!(snapshot.active_split_count(), 1);
        assert!(snapshot.find_split(&target).unwrap().is_active);
    }

    #[test]
    fn update_of_unknown_key_fails() {
        let mut snapshot = LocalSnapshot::default();
        let result = LocalMutation::UpdateExercise(Exercise::new("Curl", "3x12", 0))
            .apply_to(&mut snapshot);
        assert!(matches!(result, Err(SyncError::Storage(_))));
    }

    #[test]
    fn inserts_are_replay_safe() {
        let mut snapshot = LocalSnapshot::default();
        let point = WeightPoint::new(Utc::now(), 81.5);
        let insert = LocalMutation::InsertWeightPoint(point);
        insert.apply_to(&mut snapshot).unwrap();
        insert.apply_to(&mut snapshot).unwrap();
        assert_eq!(snapshot.weight_points.len(), 1);
    }

    #[test]
    fn day_insert_keeps_order() {
        let (store, split) = seeded();
        store
            .apply(&LocalMutation::InsertDay {
                split: split.key.clone(),
                day: Day::new("Warmup", -1),
            })
            .unwrap();
        store.commit().unwrap();
        let names: Vec<String> = store.snapshot().unwrap().splits[0]
            .days
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["Warmup", "Push"]);
    }

    #[test]
    fn assets_round_trip() {
        let assets = MemoryAssetStore::new();
        let asset = assets.persist(b"jpeg").unwrap();
        assert_eq!(assets.load(&asset).unwrap(), b"jpeg");
        assert!(assets.load(&AssetRef("missing".into())).is_err());
        assert_eq!(assets.len(), 1);
    }
}
