//! Test fixtures and a fully wired in-memory harness.
//!
//! Provides the canonical training trees used across the test suites and a
//! [`Harness`] that connects a [`SyncCoordinator`] to in-memory
//! collaborators.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use liftsync_engine::{
    BroadcastNotifier, Collaborators, LocalStore, MemoryAssetStore, MemoryLocalStore,
    MemoryRemoteStore, NetworkMonitor, NetworkQuality, RemoteEntities, RemoteNode,
    SettingsStore, SyncConfig, SyncCoordinator, TimeoutConfig,
};
use liftsync_model::{
    AssetRef, Day, DayStorage, EntityKey, Exercise, LocalSnapshot, ProgressPhoto, SetEntry,
    Split, UserProfile, WeightPoint,
};
use std::sync::Arc;
use std::time::Duration;

/// Builds a day with one exercise per lift, each carrying a single set.
pub fn day_with_lifts(name: &str, order_index: i64, lifts: &[&str]) -> Day {
    lifts
        .iter()
        .enumerate()
        .fold(Day::new(name, order_index), |day, (i, lift)| {
            day.with_exercise(
                Exercise::new(*lift, "3x8-10", i as i64).with_set(SetEntry::new(60.0, 8)),
            )
        })
}

/// The "PPL" tree: one active split, two days, three exercises each.
pub fn ppl_split() -> Split {
    let mut split = Split::new("PPL")
        .with_day(day_with_lifts("Push", 0, &["Bench Press", "Overhead Press", "Dips"]))
        .with_day(day_with_lifts("Pull", 1, &["Deadlift", "Barbell Row", "Chin-up"]));
    split.is_active = true;
    split
}

/// An inactive upper/lower split with two days of two exercises.
pub fn upper_lower_split() -> Split {
    Split::new("Upper/Lower")
        .with_day(day_with_lifts("Upper", 0, &["Incline Press", "Pull-up"]))
        .with_day(day_with_lifts("Lower", 1, &["Squat", "Romanian Deadlift"]))
}

/// Placeholder image payload for an asset reference.
pub fn placeholder_image(asset: &AssetRef) -> Vec<u8> {
    format!("image:{}", asset.as_str()).into_bytes()
}

/// A snapshot touching every entity type.
///
/// Holds the PPL tree (active) and an upper/lower tree, two history
/// entries, three weight points, a profile with an image and one progress
/// photo. Image payloads must be seeded with [`seed_assets`].
pub fn sample_snapshot() -> LocalSnapshot {
    let ppl = ppl_split();
    let base = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).single().unwrap_or_else(Utc::now);

    let history = vec![
        DayStorage::for_day("10 March 2025", &ppl.days[0], &ppl.name),
        DayStorage::for_day("11 March 2025", &ppl.days[1], &ppl.name),
    ];
    let weight_points = (0..3)
        .map(|i| WeightPoint::new(base - ChronoDuration::days(i), 82.0 - i as f64 * 0.4))
        .collect();
    let profile = UserProfile {
        display_name: "Sam".into(),
        height_cm: Some(178.0),
        weight_unit: "kg".into(),
        image: Some(AssetRef("asset-profile".into())),
        updated_at: base,
    };
    let photo = ProgressPhoto {
        key: EntityKey::new(),
        taken_at: base,
        asset: AssetRef("asset-photo-1".into()),
        note: "week 4".into(),
    };

    LocalSnapshot {
        splits: vec![ppl, upper_lower_split()],
        day_storage: history,
        weight_points,
        profile: Some(profile),
        photos: vec![photo],
    }
}

/// Stores a placeholder payload for every asset the snapshot references.
pub fn seed_assets(assets: &MemoryAssetStore, snapshot: &LocalSnapshot) {
    let refs = snapshot
        .profile
        .iter()
        .filter_map(|p| p.image.clone())
        .chain(snapshot.photos.iter().map(|p| p.asset.clone()));
    for asset in refs {
        let bytes = placeholder_image(&asset);
        assets.insert(asset, bytes);
    }
}

/// What a remote store holding exactly `snapshot` decodes to.
///
/// Parents lose their children and carry the child keys instead, the way
/// pulled records do.
pub fn remote_view(snapshot: &LocalSnapshot) -> RemoteEntities {
    let splits = snapshot
        .splits
        .iter()
        .map(|split| RemoteNode {
            entity: Split {
                days: Vec::new(),
                ..split.clone()
            },
            children: split.days.iter().map(|d| d.key.clone()).collect(),
        })
        .collect();
    let days = snapshot
        .splits
        .iter()
        .flat_map(|s| s.days.iter())
        .map(|day| RemoteNode {
            entity: Day {
                exercises: Vec::new(),
                ..day.clone()
            },
            children: day.exercises.iter().map(|e| e.key.clone()).collect(),
        })
        .collect();
    let exercises = snapshot
        .splits
        .iter()
        .flat_map(|s| s.days.iter())
        .flat_map(|d| d.exercises.iter().cloned())
        .collect();

    RemoteEntities {
        splits: Some(splits),
        days: Some(days),
        exercises: Some(exercises),
        day_storage: Some(snapshot.day_storage.clone()),
        weight_points: Some(snapshot.weight_points.clone()),
        profile: snapshot.profile.clone(),
        photos: Some(snapshot.photos.clone()),
    }
}

/// A coordinator wired to in-memory collaborators.
pub struct Harness {
    /// Shared remote store.
    pub remote: Arc<MemoryRemoteStore>,
    /// This device's local store.
    pub local: Arc<MemoryLocalStore>,
    /// This device's asset store.
    pub assets: Arc<MemoryAssetStore>,
    /// Event sink.
    pub notifier: Arc<BroadcastNotifier>,
    /// Settings over an in-memory sink.
    pub settings: Arc<SettingsStore>,
    /// Network monitor.
    pub network: Arc<NetworkMonitor>,
    /// The coordinator under test.
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    /// Starts building a harness.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// A harness with default settings, already enabled.
    pub async fn enabled() -> Self {
        let harness = Self::builder().build();
        harness.enable().await;
        harness
    }

    /// Turns sync on. Panics if the account check fails.
    pub async fn enable(&self) {
        self.coordinator
            .set_enabled(true)
            .await
            .expect("failed to enable sync");
    }

    /// Builder for another device sharing this harness's remote store.
    pub fn second_device(&self) -> HarnessBuilder {
        Self::builder().with_remote(Arc::clone(&self.remote))
    }

    /// Current committed local data.
    pub fn snapshot(&self) -> LocalSnapshot {
        self.local.snapshot().expect("memory store snapshot")
    }
}

/// Configures a [`Harness`].
pub struct HarnessBuilder {
    remote: Option<Arc<MemoryRemoteStore>>,
    snapshot: LocalSnapshot,
    config: SyncConfig,
    quality: NetworkQuality,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            remote: None,
            snapshot: LocalSnapshot::default(),
            config: SyncConfig::default(),
            quality: NetworkQuality::Excellent,
        }
    }
}

impl HarnessBuilder {
    /// Uses an existing remote store.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<MemoryRemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Seeds the local store. Referenced assets are seeded with placeholders.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: LocalSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses one deadline for every remote call.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.config = self.config.with_timeouts(TimeoutConfig::uniform(deadline));
        self
    }

    /// Sets the initial network quality.
    #[must_use]
    pub fn with_quality(mut self, quality: NetworkQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Wires the harness. The coordinator starts disabled.
    pub fn build(self) -> Harness {
        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(MemoryRemoteStore::new()));
        let assets = Arc::new(MemoryAssetStore::new());
        seed_assets(&assets, &self.snapshot);
        let local = Arc::new(MemoryLocalStore::with_snapshot(self.snapshot));
        let notifier = Arc::new(BroadcastNotifier::new(self.config.event_capacity));
        let settings = Arc::new(SettingsStore::in_memory());
        let network = Arc::new(NetworkMonitor::new(self.quality));

        let coordinator = Arc::new(SyncCoordinator::new(
            self.config,
            Collaborators {
                remote: remote.clone(),
                local: local.clone(),
                assets: assets.clone(),
                notifier: notifier.clone(),
                settings: settings.clone(),
                network: network.clone(),
            },
        ));

        Harness {
            remote,
            local,
            assets,
            notifier,
            settings,
            network,
            coordinator,
        }
    }
}
