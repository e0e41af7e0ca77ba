//! Immutable view of local data.

use crate::entity::{Day, DayStorage, Exercise, ProgressPhoto, Split, UserProfile, WeightPoint};
use crate::key::EntityKey;
use serde::{Deserialize, Serialize};

/// A point-in-time copy of everything the local store holds.
///
/// The engine never mutates local data directly; it reads a snapshot and
/// describes the changes it wants as a list of mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSnapshot {
    /// Training programs with their full trees.
    #[serde(default)]
    pub splits: Vec<Split>,
    /// Workout history, one entry per calendar date.
    #[serde(default)]
    pub day_storage: Vec<DayStorage>,
    /// Body-weight measurements.
    #[serde(default)]
    pub weight_points: Vec<WeightPoint>,
    /// The profile, if one exists locally.
    #[serde(default)]
    pub profile: Option<UserProfile>,
    /// Progress photo metadata.
    #[serde(default)]
    pub photos: Vec<ProgressPhoto>,
}

impl LocalSnapshot {
    /// Finds a split by key.
    pub fn find_split(&self, key: &EntityKey) -> Option<&Split> {
        self.splits.iter().find(|s| &s.key == key)
    }

    /// Finds a day anywhere in the split trees.
    pub fn find_day(&self, key: &EntityKey) -> Option<&Day> {
        self.splits
            .iter()
            .flat_map(|s| s.days.iter())
            .find(|d| &d.key == key)
    }

    /// Finds an exercise anywhere in the split trees.
    pub fn find_exercise(&self, key: &EntityKey) -> Option<&Exercise> {
        self.splits
            .iter()
            .flat_map(|s| s.days.iter())
            .flat_map(|d| d.exercises.iter())
            .find(|e| &e.key == key)
    }

    /// Finds the history entry for a calendar date.
    pub fn find_history(&self, date: &str) -> Option<&DayStorage> {
        self.day_storage.iter().find(|h| h.date == date)
    }

    /// Number of splits flagged active.
    pub fn active_split_count(&self) -> usize {
        self.splits.iter().filter(|s| s.is_active).count()
    }

    /// Calendar dates that appear on more than one history entry.
    pub fn duplicate_history_dates(&self) -> Vec<&str> {
        let mut dates: Vec<&str> = self.day_storage.iter().map(|h| h.date.as_str()).collect();
        dates.sort_unstable();
        let mut duplicates: Vec<&str> = dates
            .windows(2)
            .filter(|w| w[0] == w[1])
            .map(|w| w[0])
            .collect();
        duplicates.dedup();
        duplicates
    }

    /// Total number of top-level entities.
    pub fn entity_count(&self) -> usize {
        self.splits.len()
            + self.day_storage.len()
            + self.weight_points.len()
            + usize::from(self.profile.is_some())
            + self.photos.len()
    }
}
