//! Merge reconciler: folds pulled remote entities into local state.
//!
//! Reconciliation is pure. It reads a [`LocalSnapshot`] and the decoded
//! remote entities and returns a [`MergePlan`] of [`LocalMutation`]s; the
//! coordinator applies the plan to the local store.
//!
//! Composite levels (split, day, exercise) use last-write-wins on the
//! `updated_at` clock, one level at a time: a newer remote split overwrites
//! the split's own fields but never its days. Children missing locally are
//! inserted under the parent whose remote reference list names them.
//! History types are insert-if-absent and never compared.

use crate::error::SyncResult;
use crate::local::{DayFields, LocalMutation, SplitFields};
use chrono::{DateTime, Utc};
use liftsync_model::{
    Day, DayStorage, EntityKey, Exercise, LocalSnapshot, ProgressPhoto, Record, RecordCodec,
    RecordType, Split, UserProfile, WeightPoint, DAYS_REF, EXERCISES_REF,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// A decoded remote entity plus the child keys its record references.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNode<T> {
    /// The entity, without children.
    pub entity: T,
    /// Keys named by the record's reference list, in order.
    pub children: Vec<EntityKey>,
}

impl RemoteNode<Split> {
    /// Decodes a split record and its day references.
    pub fn from_split_record(record: &Record) -> SyncResult<Self> {
        Ok(Self {
            entity: Split::from_record(record)?,
            children: record.referenced_keys(DAYS_REF),
        })
    }
}

impl RemoteNode<Day> {
    /// Decodes a day record and its exercise references.
    pub fn from_day_record(record: &Record) -> SyncResult<Self> {
        Ok(Self {
            entity: Day::from_record(record)?,
            children: record.referenced_keys(EXERCISES_REF),
        })
    }
}

/// Decodes every record, skipping the ones that are malformed.
///
/// Returns the decoded values and the number of records skipped.
pub fn decode_each<T, F>(records: &[Record], decode: F) -> (Vec<T>, usize)
where
    F: Fn(&Record) -> SyncResult<T>,
{
    let mut decoded = Vec::with_capacity(records.len());
    let mut invalid = 0;
    for record in records {
        match decode(record) {
            Ok(value) => decoded.push(value),
            Err(e) => {
                warn!(record = %record.id, error = %e, "skipping malformed remote record");
                invalid += 1;
            }
        }
    }
    (decoded, invalid)
}

/// Remote entities pulled for one merge.
///
/// `None` means the type was not pulled (or its pull failed) and is left
/// out of the merge entirely.
#[derive(Debug, Clone, Default)]
pub struct RemoteEntities {
    /// Split records with their day references.
    pub splits: Option<Vec<RemoteNode<Split>>>,
    /// Day records with their exercise references.
    pub days: Option<Vec<RemoteNode<Day>>>,
    /// Exercise records.
    pub exercises: Option<Vec<Exercise>>,
    /// History entries.
    pub day_storage: Option<Vec<DayStorage>>,
    /// Weight measurements.
    pub weight_points: Option<Vec<WeightPoint>>,
    /// Profile with its image already materialized.
    pub profile: Option<UserProfile>,
    /// Photos with their images already materialized.
    pub photos: Option<Vec<ProgressPhoto>>,
}

/// Per-type merge decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeMerge {
    /// Remote entities inserted locally.
    pub inserted: usize,
    /// Local entities overwritten by a newer remote copy.
    pub updated: usize,
    /// Remote entities discarded because local was as new or newer.
    pub unchanged: usize,
    /// Remote entities that could not be placed (orphans, date clashes).
    pub skipped: usize,
}

impl TypeMerge {
    /// Returns true if the type needs local writes.
    pub fn has_changes(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

/// Result of reconciliation: what to change locally, and why.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergePlan {
    /// Mutations in application order.
    pub mutations: Vec<LocalMutation>,
    /// Decisions per record type.
    pub stats: BTreeMap<RecordType, TypeMerge>,
    /// Split made active to restore the single-active invariant.
    pub activated: Option<EntityKey>,
}

impl MergePlan {
    /// Returns true if nothing needs to change locally.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Decisions for one type.
    pub fn stats_for(&self, record_type: RecordType) -> TypeMerge {
        self.stats.get(&record_type).copied().unwrap_or_default()
    }

    /// Mutations belonging to one type, in order.
    pub fn mutations_for(&self, record_type: RecordType) -> impl Iterator<Item = &LocalMutation> {
        self.mutations
            .iter()
            .filter(move |m| m.record_type() == record_type)
    }

    fn push(&mut self, mutation: LocalMutation) {
        self.mutations.push(mutation);
    }

    fn stats_mut(&mut self, record_type: RecordType) -> &mut TypeMerge {
        self.stats.entry(record_type).or_default()
    }
}

/// Returns true if a remote profile stamped `remote_updated_at` should
/// replace the local one.
pub fn profile_is_newer(local: &LocalSnapshot, remote_updated_at: DateTime<Utc>) -> bool {
    match &local.profile {
        Some(profile) => remote_updated_at > profile.updated_at,
        None => true,
    }
}

/// Returns true if a progress photo with `key` already exists locally.
pub fn photo_is_known(local: &LocalSnapshot, key: &EntityKey) -> bool {
    local.photos.iter().any(|p| &p.key == key)
}

/// Split state after the merge, for the active-root check.
struct SplitView {
    key: EntityKey,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

/// Reconciles remote entities against local data.
pub fn reconcile(local: &LocalSnapshot, remote: &RemoteEntities) -> MergePlan {
    let mut plan = MergePlan::default();

    let mut view: Vec<SplitView> = local
        .splits
        .iter()
        .map(|s| SplitView {
            key: s.key.clone(),
            is_active: s.is_active,
            updated_at: s.updated_at,
        })
        .collect();
    let mut known_splits: HashSet<EntityKey> = local.splits.iter().map(|s| s.key.clone()).collect();

    if let Some(splits) = &remote.splits {
        merge_splits(local, splits, &mut plan, &mut view, &mut known_splits);
    }

    let mut known_days: HashSet<EntityKey> = local
        .splits
        .iter()
        .flat_map(|s| s.days.iter())
        .map(|d| d.key.clone())
        .collect();

    if let Some(days) = &remote.days {
        let parents = parent_index(remote.splits.as_deref().unwrap_or_default(), &known_splits);
        merge_days(local, days, &parents, &mut plan, &mut known_days);
    }

    if let Some(exercises) = &remote.exercises {
        let parents = parent_index(remote.days.as_deref().unwrap_or_default(), &known_days);
        merge_exercises(local, exercises, &parents, &mut plan);
    }

    enforce_single_active(&view, &mut plan);

    if let Some(entries) = &remote.day_storage {
        merge_day_storage(local, entries, &mut plan);
    }
    if let Some(points) = &remote.weight_points {
        merge_weight_points(local, points, &mut plan);
    }
    if let Some(profile) = &remote.profile {
        merge_profile(local, profile, &mut plan);
    }
    if let Some(photos) = &remote.photos {
        merge_photos(local, photos, &mut plan);
    }

    plan
}

fn merge_splits(
    local: &LocalSnapshot,
    remote: &[RemoteNode<Split>],
    plan: &mut MergePlan,
    view: &mut Vec<SplitView>,
    known: &mut HashSet<EntityKey>,
) {
    for node in remote {
        let split = &node.entity;
        match local.find_split(&split.key) {
            None if known.insert(split.key.clone()) => {
                debug!(split = %split.key, name = %split.name, "inserting remote split");
                plan.push(LocalMutation::InsertSplit(Split {
                    days: Vec::new(),
                    ..split.clone()
                }));
                view.push(SplitView {
                    key: split.key.clone(),
                    is_active: split.is_active,
                    updated_at: split.updated_at,
                });
                plan.stats_mut(RecordType::Split).inserted += 1;
            }
            None => plan.stats_mut(RecordType::Split).skipped += 1,
            Some(existing) if split.updated_at > existing.updated_at => {
                debug!(
                    split = %split.key,
                    local = %existing.updated_at,
                    remote = %split.updated_at,
                    "remote split is newer"
                );
                plan.push(LocalMutation::UpdateSplit {
                    key: split.key.clone(),
                    fields: SplitFields::from(split),
                });
                if let Some(entry) = view.iter_mut().find(|v| v.key == split.key) {
                    entry.is_active = split.is_active;
                    entry.updated_at = split.updated_at;
                }
                plan.stats_mut(RecordType::Split).updated += 1;
            }
            Some(_) => plan.stats_mut(RecordType::Split).unchanged += 1,
        }
    }
}

/// Maps child key to parent key, for parents that exist after the merge.
fn parent_index<T>(
    nodes: &[RemoteNode<T>],
    known_parents: &HashSet<EntityKey>,
) -> HashMap<EntityKey, EntityKey>
where
    T: RecordCodec,
{
    let mut index = HashMap::new();
    for node in nodes {
        let parent = node.entity.key();
        if !known_parents.contains(parent) {
            continue;
        }
        for child in &node.children {
            index.entry(child.clone()).or_insert_with(|| parent.clone());
        }
    }
    index
}

fn merge_days(
    local: &LocalSnapshot,
    remote: &[RemoteNode<Day>],
    parents: &HashMap<EntityKey, EntityKey>,
    plan: &mut MergePlan,
    known: &mut HashSet<EntityKey>,
) {
    for node in remote {
        let day = &node.entity;
        match local.find_day(&day.key) {
            Some(existing) if day.updated_at > existing.updated_at => {
                plan.push(LocalMutation::UpdateDay {
                    key: day.key.clone(),
                    fields: DayFields::from(day),
                });
                plan.stats_mut(RecordType::Day).updated += 1;
            }
            Some(_) => plan.stats_mut(RecordType::Day).unchanged += 1,
            None => match parents.get(&day.key) {
                Some(split) if known.insert(day.key.clone()) => {
                    plan.push(LocalMutation::InsertDay {
                        split: split.clone(),
                        day: Day {
                            exercises: Vec::new(),
                            ..day.clone()
                        },
                    });
                    plan.stats_mut(RecordType::Day).inserted += 1;
                }
                _ => {
                    debug!(day = %day.key, "remote day has no known parent, skipping");
                    plan.stats_mut(RecordType::Day).skipped += 1;
                }
            },
        }
    }
}

fn merge_exercises(
    local: &LocalSnapshot,
    remote: &[Exercise],
    parents: &HashMap<EntityKey, EntityKey>,
    plan: &mut MergePlan,
) {
    let mut inserted = HashSet::new();
    for exercise in remote {
        match local.find_exercise(&exercise.key) {
            Some(existing) if exercise.updated_at > existing.updated_at => {
                plan.push(LocalMutation::UpdateExercise(exercise.clone()));
                plan.stats_mut(RecordType::Exercise).updated += 1;
            }
            Some(_) => plan.stats_mut(RecordType::Exercise).unchanged += 1,
            None => match parents.get(&exercise.key) {
                Some(day) if inserted.insert(exercise.key.clone()) => {
                    plan.push(LocalMutation::InsertExercise {
                        day: day.clone(),
                        exercise: exercise.clone(),
                    });
                    plan.stats_mut(RecordType::Exercise).inserted += 1;
                }
                _ => {
                    debug!(exercise = %exercise.key, "remote exercise has no known parent, skipping");
                    plan.stats_mut(RecordType::Exercise).skipped += 1;
                }
            },
        }
    }
}

/// Leaves exactly one split active when any split exists.
///
/// With none active the first split becomes active; with several, the
/// most recently updated one keeps the flag.
fn enforce_single_active(view: &[SplitView], plan: &mut MergePlan) {
    let active: Vec<&SplitView> = view.iter().filter(|v| v.is_active).collect();
    let chosen = match active.len() {
        1 => return,
        0 => view.first(),
        _ => active
            .iter()
            .copied()
            .reduce(|best, v| if v.updated_at > best.updated_at { v } else { best }),
    };
    if let Some(split) = chosen {
        debug!(split = %split.key, previously_active = active.len(), "restoring single active split");
        plan.push(LocalMutation::SetActiveSplit(split.key.clone()));
        plan.activated = Some(split.key.clone());
    }
}

fn merge_day_storage(local: &LocalSnapshot, remote: &[DayStorage], plan: &mut MergePlan) {
    let mut keys: HashSet<&EntityKey> = local.day_storage.iter().map(|h| &h.key).collect();
    let mut dates: HashSet<&str> = local.day_storage.iter().map(|h| h.date.as_str()).collect();

    for entry in remote {
        if keys.contains(&entry.key) {
            plan.stats_mut(RecordType::DayStorage).unchanged += 1;
        } else if dates.contains(entry.date.as_str()) {
            debug!(entry = %entry.key, date = %entry.date, "history date already recorded, skipping");
            plan.stats_mut(RecordType::DayStorage).skipped += 1;
        } else {
            keys.insert(&entry.key);
            dates.insert(entry.date.as_str());
            plan.push(LocalMutation::InsertDayStorage(entry.clone()));
            plan.stats_mut(RecordType::DayStorage).inserted += 1;
        }
    }
}

fn merge_weight_points(local: &LocalSnapshot, remote: &[WeightPoint], plan: &mut MergePlan) {
    let mut keys: HashSet<&EntityKey> = local.weight_points.iter().map(|w| &w.key).collect();
    for point in remote {
        if keys.insert(&point.key) {
            plan.push(LocalMutation::InsertWeightPoint(point.clone()));
            plan.stats_mut(RecordType::WeightPoint).inserted += 1;
        } else {
            plan.stats_mut(RecordType::WeightPoint).unchanged += 1;
        }
    }
}

fn merge_profile(local: &LocalSnapshot, remote: &UserProfile, plan: &mut MergePlan) {
    if !profile_is_newer(local, remote.updated_at) {
        plan.stats_mut(RecordType::UserProfile).unchanged += 1;
        return;
    }
    let stats = plan.stats_mut(RecordType::UserProfile);
    if local.profile.is_some() {
        stats.updated += 1;
    } else {
        stats.inserted += 1;
    }
    plan.push(LocalMutation::UpsertProfile(remote.clone()));
}

fn merge_photos(local: &LocalSnapshot, remote: &[ProgressPhoto], plan: &mut MergePlan) {
    let mut keys: HashSet<&EntityKey> = local.photos.iter().map(|p| &p.key).collect();
    for photo in remote {
        if keys.insert(&photo.key) {
            plan.push(LocalMutation::InsertProgressPhoto(photo.clone()));
            plan.stats_mut(RecordType::ProgressPhoto).inserted += 1;
        } else {
            plan.stats_mut(RecordType::ProgressPhoto).unchanged += 1;
        }
    }
}
