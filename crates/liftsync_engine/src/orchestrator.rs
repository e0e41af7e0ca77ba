//! Dependency-ordered save of composite trees.
//!
//! The remote store refuses references to records it does not hold, so a
//! tree is written bottom-up: every exercise of a day before the day, every
//! day of a split before the split. Siblings at one level are written
//! concurrently and a failed sibling never cancels the others; the parent
//! then references only the children that were actually saved, and each
//! omitted child is reported as a [`DroppedChild`].

use crate::error::{FailureKind, SyncError, SyncResult};
use crate::remote::GuardedRemote;
use futures::future::join_all;
use liftsync_model::{
    Day, Exercise, RecordCodec, RecordId, Reference, Split, DAYS_REF, EXERCISES_REF,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Per-record outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveCounts {
    /// Records written.
    pub succeeded: usize,
    /// Records whose write timed out.
    pub timed_out: usize,
    /// Records whose write failed for another reason.
    pub failed: usize,
}

impl SaveCounts {
    /// Counts one outcome.
    pub fn record<T>(&mut self, result: &SyncResult<T>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(e) => match e.kind() {
                FailureKind::TimedOut => self.timed_out += 1,
                FailureKind::Failed => self.failed += 1,
            },
        }
    }

    /// Adds another set of counts.
    pub fn merge(&mut self, other: SaveCounts) {
        self.succeeded += other.succeeded;
        self.timed_out += other.timed_out;
        self.failed += other.failed;
    }

    /// Total records attempted.
    pub fn total(&self) -> usize {
        self.succeeded + self.timed_out + self.failed
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.timed_out == 0 && self.failed == 0
    }
}

/// A child left out of its parent's reference list because its save failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedChild {
    /// The child that was not saved.
    pub id: RecordId,
    /// The parent whose reference list omits it.
    pub parent: RecordId,
    /// Whether the failure was a timeout.
    pub kind: FailureKind,
    /// Failure description.
    pub reason: String,
}

/// Outcome of saving one entity (and its tree, for composites).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Top-level record.
    pub target: RecordId,
    /// Whether the top-level record itself was written.
    pub saved: bool,
    /// Counts across every record attempted.
    pub counts: SaveCounts,
    /// Children omitted from a parent reference list.
    pub dropped: Vec<DroppedChild>,
    /// Error of the top-level record, if it failed.
    pub error: Option<String>,
}

impl SaveReport {
    /// Report for a single record write.
    pub fn single<T>(target: RecordId, result: &SyncResult<T>) -> Self {
        let mut counts = SaveCounts::default();
        counts.record(result);
        Self {
            target,
            saved: result.is_ok(),
            counts,
            dropped: Vec::new(),
            error: result.as_ref().err().map(ToString::to_string),
        }
    }

    /// Returns true if any record timed out.
    pub fn has_transient_failures(&self) -> bool {
        self.counts.timed_out > 0
    }

    /// Returns true if every record was written.
    pub fn is_clean(&self) -> bool {
        self.saved && self.counts.is_clean()
    }
}

/// Outcome of one subtree: counts below it plus its own result.
struct LevelOutcome {
    counts: SaveCounts,
    dropped: Vec<DroppedChild>,
    result: SyncResult<()>,
}

/// Writes composite trees in dependency order.
#[derive(Clone)]
pub struct SaveOrchestrator {
    remote: GuardedRemote,
}

impl SaveOrchestrator {
    /// Creates an orchestrator over a guarded remote.
    pub fn new(remote: GuardedRemote) -> Self {
        Self { remote }
    }

    /// Saves a split: exercises, then days, then the split.
    pub async fn save_split(&self, split: &Split) -> SaveReport {
        let root = split.record_id();
        let outcomes = join_all(split.days.iter().map(|day| self.save_day(day))).await;

        let mut counts = SaveCounts::default();
        let mut dropped = Vec::new();
        let mut day_refs = Vec::with_capacity(split.days.len());

        for (day, outcome) in split.days.iter().zip(outcomes) {
            counts.merge(outcome.counts);
            dropped.extend(outcome.dropped);
            match outcome.result {
                Ok(()) => day_refs.push(Reference::owned(day.record_id())),
                Err(e) => dropped.push(drop_child(day.record_id(), &root, &e)),
            }
        }

        let result = async {
            let mut record = split.to_record()?;
            record.set_references(DAYS_REF, day_refs);
            self.remote.upsert(record).await
        }
        .await;
        counts.record(&result);

        info!(
            split = %root,
            succeeded = counts.succeeded,
            timed_out = counts.timed_out,
            failed = counts.failed,
            dropped = dropped.len(),
            "split tree saved"
        );

        SaveReport {
            target: root,
            saved: result.is_ok(),
            counts,
            dropped,
            error: result.err().map(|e| e.to_string()),
        }
    }

    async fn save_day(&self, day: &Day) -> LevelOutcome {
        let parent = day.record_id();
        let results = join_all(day.exercises.iter().map(|e| self.save_exercise(e))).await;

        let mut counts = SaveCounts::default();
        let mut dropped = Vec::new();
        let mut exercise_refs = Vec::with_capacity(day.exercises.len());

        for (exercise, result) in day.exercises.iter().zip(results) {
            counts.record(&result);
            match result {
                Ok(()) => exercise_refs.push(Reference::owned(exercise.record_id())),
                Err(e) => dropped.push(drop_child(exercise.record_id(), &parent, &e)),
            }
        }

        let result = async {
            let mut record = day.to_record()?;
            record.set_references(EXERCISES_REF, exercise_refs);
            self.remote.upsert(record).await.map(|_| ())
        }
        .await;
        counts.record(&result);

        LevelOutcome {
            counts,
            dropped,
            result,
        }
    }

    async fn save_exercise(&self, exercise: &Exercise) -> SyncResult<()> {
        let record = exercise.to_record()?;
        self.remote.upsert(record).await?;
        debug!(exercise = %exercise.key, sets = exercise.sets.len(), "exercise saved");
        Ok(())
    }
}

fn drop_child(id: RecordId, parent: &RecordId, error: &SyncError) -> DroppedChild {
    warn!(child = %id, parent = %parent, error = %error, "child omitted from parent references");
    DroppedChild {
        id,
        parent: parent.clone(),
        kind: error.kind(),
        reason: error.to_string(),
    }
}
