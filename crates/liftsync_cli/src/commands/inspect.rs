//! Inspect command implementation.

use super::load_snapshot;
use liftsync_model::{LocalSnapshot, Split};
use serde::Serialize;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// One entry per split.
    pub splits: Vec<SplitSummary>,
    /// Number of splits flagged active.
    pub active_splits: usize,
    /// Number of history entries.
    pub history_entries: usize,
    /// Dates recorded more than once.
    pub duplicate_dates: Vec<String>,
    /// Number of weight measurements.
    pub weight_points: usize,
    /// Whether a profile exists.
    pub has_profile: bool,
    /// Number of progress photos.
    pub photos: usize,
    /// Invariant violations found.
    pub warnings: Vec<String>,
}

/// Shape of one split tree.
#[derive(Debug, Serialize)]
pub struct SplitSummary {
    /// Split key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Whether the split is active.
    pub active: bool,
    /// Number of days.
    pub days: usize,
    /// Number of exercises across all days.
    pub exercises: usize,
    /// Number of logged sets across all exercises.
    pub sets: usize,
}

impl From<&Split> for SplitSummary {
    fn from(split: &Split) -> Self {
        Self {
            key: split.key.to_string(),
            name: split.name.clone(),
            active: split.is_active,
            days: split.days.len(),
            exercises: split.exercise_count(),
            sets: split
                .days
                .iter()
                .flat_map(|d| d.exercises.iter())
                .map(|e| e.sets.len())
                .sum(),
        }
    }
}

/// Summarizes a snapshot and checks its invariants.
pub fn analyze(path: &str, snapshot: &LocalSnapshot) -> InspectResult {
    let active_splits = snapshot.active_split_count();
    let duplicate_dates: Vec<String> = snapshot
        .duplicate_history_dates()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut warnings = Vec::new();
    if !snapshot.splits.is_empty() && active_splits != 1 {
        warnings.push(format!("{active_splits} active splits, expected exactly 1"));
    }
    for date in &duplicate_dates {
        warnings.push(format!("history date {date} recorded more than once"));
    }

    InspectResult {
        path: path.to_string(),
        splits: snapshot.splits.iter().map(SplitSummary::from).collect(),
        active_splits,
        history_entries: snapshot.day_storage.len(),
        duplicate_dates,
        weight_points: snapshot.weight_points.len(),
        has_profile: snapshot.profile.is_some(),
        photos: snapshot.photos.len(),
        warnings,
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = load_snapshot(path)?;
    let result = analyze(&path.display().to_string(), &snapshot);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("liftsync Snapshot Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Splits:");
    for split in &result.splits {
        let marker = if split.active { "*" } else { " " };
        println!(
            "  {marker} {} ({} days, {} exercises, {} sets)",
            split.name, split.days, split.exercises, split.sets
        );
    }
    println!();
    println!("History:");
    println!("  Entries:       {}", result.history_entries);
    println!("  Weight points: {}", result.weight_points);
    println!("  Photos:        {}", result.photos);
    println!("  Profile:       {}", if result.has_profile { "yes" } else { "no" });

    if result.warnings.is_empty() {
        println!();
        println!("No problems found.");
    } else {
        println!();
        println!("Warnings:");
        for warning in &result.warnings {
            println!("  - {warning}");
        }
    }
}
