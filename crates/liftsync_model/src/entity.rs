//! Workout entities.
//!
//! The composite tree is `Split` → `Day` → `Exercise` → `SetEntry`. Splits,
//! days and exercises are synchronized as independent remote records linked
//! by references; set entries travel embedded inside their exercise.
//!
//! `DayStorage`, `WeightPoint` and `ProgressPhoto` are history: written once
//! per occurrence and never edited afterwards.

use crate::key::EntityKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed key of the single profile record.
pub const PROFILE_KEY: &str = "user-profile";

/// Reference to a binary asset held by the local asset store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    /// Returns the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A training program: the composite root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    /// Stable key.
    pub key: EntityKey,
    /// Display name.
    pub name: String,
    /// Whether this is the split currently being followed.
    pub is_active: bool,
    /// Date the user started following the split. Domain data only.
    pub start_date: Option<DateTime<Utc>>,
    /// Mutation clock used for last-write-wins.
    pub updated_at: DateTime<Utc>,
    /// Training days, in order.
    #[serde(default)]
    pub days: Vec<Day>,
}

impl Split {
    /// Creates an empty split stamped with the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(),
            name: name.into(),
            is_active: false,
            start_date: None,
            updated_at: Utc::now(),
            days: Vec::new(),
        }
    }

    /// Adds a day, returning self for chaining.
    pub fn with_day(mut self, day: Day) -> Self {
        self.days.push(day);
        self
    }

    /// Advances the mutation clock after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = next_clock(self.updated_at);
    }

    /// Number of exercises across all days.
    pub fn exercise_count(&self) -> usize {
        self.days.iter().map(|d| d.exercises.len()).sum()
    }
}

/// A training day inside a split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    /// Stable key.
    pub key: EntityKey,
    /// Display name ("Push", "Legs", ...).
    pub name: String,
    /// Position inside the split.
    pub order_index: i64,
    /// Calendar label of the last time this day was trained.
    #[serde(default)]
    pub calendar_label: String,
    /// Mutation clock used for last-write-wins.
    pub updated_at: DateTime<Utc>,
    /// Exercises, in order.
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

impl Day {
    /// Creates an empty day.
    pub fn new(name: impl Into<String>, order_index: i64) -> Self {
        Self {
            key: EntityKey::new(),
            name: name.into(),
            order_index,
            calendar_label: String::new(),
            updated_at: Utc::now(),
            exercises: Vec::new(),
        }
    }

    /// Adds an exercise, returning self for chaining.
    pub fn with_exercise(mut self, exercise: Exercise) -> Self {
        self.exercises.push(exercise);
        self
    }

    /// Advances the mutation clock after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = next_clock(self.updated_at);
    }
}

/// An exercise inside a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    /// Stable key.
    pub key: EntityKey,
    /// Display name.
    pub name: String,
    /// Target prescription, e.g. "3x8-10".
    pub target_spec: String,
    /// Position inside the day.
    pub order_index: i64,
    /// When the exercise was last completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the exercise is marked done for the current session.
    pub done: bool,
    /// Mutation clock used for last-write-wins.
    pub updated_at: DateTime<Utc>,
    /// Logged sets, in order.
    #[serde(default)]
    pub sets: Vec<SetEntry>,
}

impl Exercise {
    /// Creates an exercise with no sets.
    pub fn new(name: impl Into<String>, target_spec: impl Into<String>, order_index: i64) -> Self {
        Self {
            key: EntityKey::new(),
            name: name.into(),
            target_spec: target_spec.into(),
            order_index,
            completed_at: None,
            done: false,
            updated_at: Utc::now(),
            sets: Vec::new(),
        }
    }

    /// Adds a set, returning self for chaining.
    pub fn with_set(mut self, set: SetEntry) -> Self {
        self.sets.push(set);
        self
    }

    /// Marks the exercise done at `at` and advances the clock.
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.done = true;
        self.completed_at = Some(at);
        self.touch();
    }

    /// Advances the mutation clock after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = next_clock(self.updated_at);
    }
}

/// One logged set. Never a remote record of its own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetEntry {
    /// Load.
    pub weight: f64,
    /// Repetitions.
    pub reps: u32,
    /// Taken to failure.
    #[serde(default)]
    pub failure: bool,
    /// Warm-up set.
    #[serde(default)]
    pub warmup: bool,
    /// Rest-pause set.
    #[serde(default)]
    pub rest_pause: bool,
    /// Drop set.
    #[serde(default)]
    pub drop_set: bool,
    /// Performed with body weight only.
    #[serde(default)]
    pub body_weight: bool,
    /// Time-of-day label.
    #[serde(default)]
    pub time_label: String,
    /// Free-form note.
    #[serde(default)]
    pub note: String,
}

impl SetEntry {
    /// Creates a plain working set.
    pub fn new(weight: f64, reps: u32) -> Self {
        Self {
            weight,
            reps,
            ..Self::default()
        }
    }
}

/// History entry for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStorage {
    /// Stable key.
    pub key: EntityKey,
    /// Calendar date label, e.g. "10 March 2025". Unique among entries.
    pub date: String,
    /// Day that was trained.
    pub day_key: EntityKey,
    /// Name of the trained day at the time.
    pub day_name: String,
    /// Name of the owning split at the time.
    #[serde(default)]
    pub split_name: String,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl DayStorage {
    /// Creates a history entry for `date` pointing at `day`.
    pub fn for_day(date: impl Into<String>, day: &Day, split_name: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(),
            date: date.into(),
            day_key: day.key.clone(),
            day_name: day.name.clone(),
            split_name: split_name.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Body-weight measurement. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightPoint {
    /// Stable key.
    pub key: EntityKey,
    /// Measurement time.
    pub recorded_at: DateTime<Utc>,
    /// Measured value.
    pub value: f64,
}

impl WeightPoint {
    /// Creates a measurement.
    pub fn new(recorded_at: DateTime<Utc>, value: f64) -> Self {
        Self {
            key: EntityKey::new(),
            recorded_at,
            value,
        }
    }
}

/// The account's profile. Exactly one per account, under [`PROFILE_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Display name.
    pub display_name: String,
    /// Height in centimetres.
    pub height_cm: Option<f64>,
    /// Preferred weight unit label ("kg" / "lb").
    pub weight_unit: String,
    /// Local reference to the profile image, if any.
    pub image: Option<AssetRef>,
    /// Mutation clock used for last-write-wins.
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// The fixed profile key.
    pub fn key() -> EntityKey {
        EntityKey::from(PROFILE_KEY)
    }

    /// Advances the mutation clock after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = next_clock(self.updated_at);
    }
}

/// Progress photo metadata; the image itself lives in the asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPhoto {
    /// Stable key.
    pub key: EntityKey,
    /// When the photo was taken.
    pub taken_at: DateTime<Utc>,
    /// Local asset reference.
    pub asset: AssetRef,
    /// Free-form note.
    #[serde(default)]
    pub note: String,
}

/// Returns a clock value strictly greater than `previous`, normally "now".
fn next_clock(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}
