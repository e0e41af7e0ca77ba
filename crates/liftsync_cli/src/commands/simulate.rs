//! Simulate command implementation.
//!
//! Two devices share one in-memory remote store. The source device holds
//! the snapshot and runs a manual full sync; a second, empty device then
//! runs a fetch-and-merge. Latency and hanging keys are injected into the
//! remote store.

use super::{load_snapshot, CliError};
use chrono::Utc;
use liftsync_engine::{
    BroadcastNotifier, Collaborators, JsonFileSink, LocalStore, MemoryAssetStore,
    MemoryLocalStore, MemoryRemoteStore, MergeReport, NetworkMonitor, NetworkQuality,
    PendingRetry, SettingsStore, SyncConfig, SyncCoordinator, SyncReport, SyncStats,
    TimeoutConfig, Trigger,
};
use liftsync_model::LocalSnapshot;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Knobs for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Latency added to every remote call.
    pub latency: Duration,
    /// Deadline for every remote call.
    pub timeout: Duration,
    /// Entity keys whose remote calls hang.
    pub hang: Vec<String>,
    /// Optional settings file for the source device.
    pub settings: Option<PathBuf>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            timeout: Duration::from_secs(5),
            hang: Vec::new(),
            settings: None,
        }
    }
}

/// Shape of the merged device after the round trip.
#[derive(Debug, Serialize)]
pub struct MergedCounts {
    /// Splits.
    pub splits: usize,
    /// Splits flagged active.
    pub active_splits: usize,
    /// Exercises across all trees.
    pub exercises: usize,
    /// History entries.
    pub history_entries: usize,
    /// Weight measurements.
    pub weight_points: usize,
    /// Progress photos.
    pub photos: usize,
}

impl From<&LocalSnapshot> for MergedCounts {
    fn from(snapshot: &LocalSnapshot) -> Self {
        Self {
            splits: snapshot.splits.len(),
            active_splits: snapshot.active_split_count(),
            exercises: snapshot.splits.iter().map(|s| s.exercise_count()).sum(),
            history_entries: snapshot.day_storage.len(),
            weight_points: snapshot.weight_points.len(),
            photos: snapshot.photos.len(),
        }
    }
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// "N synced, M will retry, K failed".
    pub summary: String,
    /// Full sync report of the source device.
    pub sync: SyncReport,
    /// Merge report of the receiving device.
    pub merge: MergeReport,
    /// Records held by the remote store afterwards.
    pub remote_records: usize,
    /// Receiving device contents.
    pub merged: MergedCounts,
    /// Retries still queued on the source device.
    pub pending_retries: Vec<PendingRetry>,
    /// Source device counters.
    pub stats: SyncStats,
    /// Age of the source device's last successful sync.
    pub last_synced: String,
}

struct Device {
    local: Arc<MemoryLocalStore>,
    settings: Arc<SettingsStore>,
    coordinator: SyncCoordinator,
}

fn device(
    remote: &Arc<MemoryRemoteStore>,
    snapshot: LocalSnapshot,
    settings: SettingsStore,
    config: SyncConfig,
) -> Device {
    let assets = Arc::new(MemoryAssetStore::new());
    let refs = snapshot
        .profile
        .iter()
        .filter_map(|p| p.image.clone())
        .chain(snapshot.photos.iter().map(|p| p.asset.clone()));
    for asset in refs {
        let bytes = format!("placeholder:{}", asset.as_str()).into_bytes();
        assets.insert(asset, bytes);
    }

    let local = Arc::new(MemoryLocalStore::with_snapshot(snapshot));
    let settings = Arc::new(settings);
    let coordinator = SyncCoordinator::new(
        config.clone(),
        Collaborators {
            remote: remote.clone(),
            local: local.clone(),
            assets,
            notifier: Arc::new(BroadcastNotifier::new(config.event_capacity)),
            settings: settings.clone(),
            network: Arc::new(NetworkMonitor::new(NetworkQuality::Excellent)),
        },
    );
    Device {
        local,
        settings,
        coordinator,
    }
}

/// Runs the round trip.
pub async fn simulate(
    snapshot: LocalSnapshot,
    options: &SimulateOptions,
) -> Result<SimulateResult, CliError> {
    let config = SyncConfig::new().with_timeouts(TimeoutConfig::uniform(options.timeout));
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_latency(options.latency);
    for key in &options.hang {
        remote.hang_key(key);
    }

    let settings = match &options.settings {
        Some(path) => SettingsStore::open(
            Arc::new(JsonFileSink::new(path)),
            config.settings_flush_delay,
        )?,
        None => SettingsStore::in_memory(),
    };

    let source = device(&remote, snapshot.clone(), settings, config.clone());
    source.coordinator.set_enabled(true).await?;
    let sync = source
        .coordinator
        .full_sync(&snapshot, Trigger::Manual)
        .await?;
    info!(summary = %sync.summary(), "source device synced");

    let target = device(
        &remote,
        LocalSnapshot::default(),
        SettingsStore::in_memory(),
        config,
    );
    target.coordinator.set_enabled(true).await?;
    let merge = target.coordinator.fetch_and_merge().await?;
    let merged = target.local.snapshot()?;

    source.settings.flush()?;
    Ok(SimulateResult {
        summary: sync.summary(),
        sync,
        merge,
        remote_records: remote.len(),
        merged: MergedCounts::from(&merged),
        pending_retries: source.coordinator.retry_queue().pending(),
        stats: source.coordinator.stats(),
        last_synced: source.settings.last_synced_label(Utc::now()),
    })
}

/// Runs the simulate command.
pub async fn run(
    path: &Path,
    options: &SimulateOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = load_snapshot(path)?;
    let result = simulate(snapshot, options).await?;

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

fn print_text_output(result: &SimulateResult) {
    println!("liftsync Sync Simulation");
    println!("========================");
    println!();
    println!("Full sync: {}", result.summary);
    for dropped in result.sync.dropped() {
        println!(
            "  dropped {} from {} ({:?}): {}",
            dropped.id, dropped.parent, dropped.kind, dropped.reason
        );
    }
    for retry in &result.pending_retries {
        println!("  queued retry #{}: {}", retry.id, retry.description);
    }
    println!("Remote records: {}", result.remote_records);
    println!("Last synced:    {}", result.last_synced);
    println!();
    println!("Merge into empty device:");
    println!("  Applied mutations: {}", result.merge.applied);
    println!("  Splits:            {}", result.merged.splits);
    println!("  Active splits:     {}", result.merged.active_splits);
    println!("  Exercises:         {}", result.merged.exercises);
    println!("  History entries:   {}", result.merged.history_entries);
    println!("  Weight points:     {}", result.merged.weight_points);
    println!("  Photos:            {}", result.merged.photos);
    for (record_type, reason) in &result.merge.failures {
        println!("  failed {record_type}: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftsync_model::{Day, Exercise, Split, WeightPoint};

    fn snapshot() -> LocalSnapshot {
        let mut split = Split::new("PPL")
            .with_day(
                Day::new("Push", 0)
                    .with_exercise(Exercise::new("Bench", "3x8", 0))
                    .with_exercise(Exercise::new("Dips", "3x10", 1)),
            )
            .with_day(Day::new("Pull", 1).with_exercise(Exercise::new("Row", "3x10", 0)));
        split.is_active = true;
        LocalSnapshot {
            splits: vec![split],
            weight_points: vec![WeightPoint::new(Utc::now(), 80.0)],
            ..LocalSnapshot::default()
        }
    }

    #[tokio::test]
    async fn round_trip_reproduces_the_tree() {
        let result = simulate(snapshot(), &SimulateOptions::default())
            .await
            .unwrap();

        assert_eq!(result.summary, "7 synced, 0 will retry, 0 failed");
        assert_eq!(result.remote_records, 7);
        assert_eq!(result.merged.exercises, 3);
        assert_eq!(result.merged.active_splits, 1);
        assert_eq!(result.last_synced, "Just now");
        assert!(result.merge.is_clean());
    }

    #[tokio::test]
    async fn hanging_key_is_reported_and_queued() {
        let snapshot = snapshot();
        let options = SimulateOptions {
            timeout: Duration::from_millis(50),
            hang: vec![snapshot.weight_points[0].key.to_string()],
            ..SimulateOptions::default()
        };

        let result = simulate(snapshot, &options).await.unwrap();

        assert_eq!(result.summary, "6 synced, 1 will retry, 0 failed");
        assert_eq!(result.pending_retries.len(), 1);
        assert_eq!(result.merged.weight_points, 0);
        assert_eq!(result.last_synced, "Never");
    }

    #[tokio::test]
    async fn settings_file_records_the_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let options = SimulateOptions {
            settings: Some(path.clone()),
            ..SimulateOptions::default()
        };

        simulate(snapshot(), &options).await.unwrap();

        let reopened =
            SettingsStore::open(Arc::new(JsonFileSink::new(&path)), Duration::ZERO).unwrap();
        assert!(reopened.sync_enabled());
        assert!(reopened.last_synced_at().is_some());
    }
}
