//! Property-based test generators using proptest.
//!
//! Provides strategies for workout trees and whole snapshots that keep the
//! invariants the engine relies on: unique keys, at most one history entry
//! per date and exactly one active split whenever any split exists.

use chrono::{DateTime, TimeZone, Utc};
use liftsync_model::{
    Day, DayStorage, EntityKey, Exercise, LocalSnapshot, SetEntry, Split, UserProfile,
    WeightPoint,
};
use proptest::prelude::*;

/// Strategy for mutation clocks between 2020 and 2030, whole seconds.
pub fn clock_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..1_893_456_000i64)
        .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now))
}

/// Strategy for display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,11}( [A-Z][a-z]{2,8})?").expect("Invalid regex")
}

/// Strategy for logged sets.
pub fn set_entry_strategy() -> impl Strategy<Value = SetEntry> {
    (
        0u32..1200,
        0u32..30,
        prop::array::uniform5(any::<bool>()),
        prop::string::string_regex("[a-z ]{0,12}").expect("Invalid regex"),
    )
        .prop_map(|(quarter_kg, reps, flags, note)| SetEntry {
            weight: f64::from(quarter_kg) * 0.25,
            reps,
            failure: flags[0],
            warmup: flags[1],
            rest_pause: flags[2],
            drop_set: flags[3],
            body_weight: flags[4],
            time_label: String::new(),
            note,
        })
}

/// Strategy for an exercise with up to five sets.
pub fn exercise_strategy() -> impl Strategy<Value = Exercise> {
    (
        name_strategy(),
        0i64..10,
        prop::collection::vec(set_entry_strategy(), 0..5),
        clock_strategy(),
        any::<bool>(),
    )
        .prop_map(|(name, order_index, sets, updated_at, done)| Exercise {
            key: EntityKey::new(),
            name,
            target_spec: "3x8-12".into(),
            order_index,
            completed_at: done.then_some(updated_at),
            done,
            updated_at,
            sets,
        })
}

/// Strategy for a day with up to four exercises.
pub fn day_strategy() -> impl Strategy<Value = Day> {
    (
        name_strategy(),
        0i64..7,
        prop::collection::vec(exercise_strategy(), 0..4),
        clock_strategy(),
    )
        .prop_map(|(name, order_index, exercises, updated_at)| Day {
            key: EntityKey::new(),
            name,
            order_index,
            calendar_label: String::new(),
            updated_at,
            exercises,
        })
}

/// Strategy for an inactive split with up to four days.
pub fn split_strategy() -> impl Strategy<Value = Split> {
    (
        name_strategy(),
        prop::collection::vec(day_strategy(), 0..4),
        clock_strategy(),
        prop::option::of(clock_strategy()),
    )
        .prop_map(|(name, days, updated_at, start_date)| Split {
            key: EntityKey::new(),
            name,
            is_active: false,
            start_date,
            updated_at,
            days,
        })
}

/// Strategy for history entries on distinct March 2025 dates.
pub fn history_strategy() -> impl Strategy<Value = Vec<DayStorage>> {
    (
        prop::collection::btree_set(1u32..29, 0..5),
        clock_strategy(),
    )
        .prop_map(|(days, recorded_at)| {
            days.into_iter()
                .map(|day| DayStorage {
                    key: EntityKey::new(),
                    date: format!("{day} March 2025"),
                    day_key: EntityKey::new(),
                    day_name: "Push".into(),
                    split_name: "PPL".into(),
                    recorded_at,
                })
                .collect()
        })
}

/// Strategy for a profile without an image.
pub fn profile_strategy() -> impl Strategy<Value = UserProfile> {
    (name_strategy(), prop::option::of(140u32..210), clock_strategy()).prop_map(
        |(display_name, height, updated_at)| UserProfile {
            display_name,
            height_cm: height.map(f64::from),
            weight_unit: "kg".into(),
            image: None,
            updated_at,
        },
    )
}

/// Strategy for snapshots without asset-bearing photos.
///
/// When at least one split is generated, exactly one is active.
pub fn snapshot_strategy() -> impl Strategy<Value = LocalSnapshot> {
    (
        prop::collection::vec(split_strategy(), 0..4),
        any::<prop::sample::Index>(),
        history_strategy(),
        prop::collection::vec((clock_strategy(), 40u32..160), 0..5),
        prop::option::of(profile_strategy()),
    )
        .prop_map(|(mut splits, active, day_storage, weights, profile)| {
            if !splits.is_empty() {
                let index = active.index(splits.len());
                splits[index].is_active = true;
            }
            LocalSnapshot {
                splits,
                day_storage,
                weight_points: weights
                    .into_iter()
                    .map(|(at, kg)| WeightPoint::new(at, f64::from(kg)))
                    .collect(),
                profile,
                photos: Vec::new(),
            }
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 512,
            max_shrink_iters: 5000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn snapshot_has_single_active_split(snapshot in snapshot_strategy()) {
            let expected = usize::from(!snapshot.splits.is_empty());
            prop_assert_eq!(snapshot.active_split_count(), expected);
        }

        #[test]
        fn history_dates_are_unique(history in history_strategy()) {
            let snapshot = LocalSnapshot { day_storage: history, ..LocalSnapshot::default() };
            prop_assert!(snapshot.duplicate_history_dates().is_empty());
        }

        #[test]
        fn weights_are_quarter_kilos(set in set_entry_strategy()) {
            prop_assert_eq!((set.weight * 4.0).fract(), 0.0);
        }
    }
}
