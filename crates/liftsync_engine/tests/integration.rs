//! Integration tests for the coordinator over in-memory collaborators.
//!
//! These exercise the engine end to end: tree ordering against the remote
//! call log, retry behavior under hanging calls, merges between two devices
//! sharing one remote store, and history date collisions.

use chrono::{Duration as ChronoDuration, Utc};
use liftsync_engine::{
    BroadcastNotifier, Collaborators, DrainSkip, LocalStore, MemoryAssetStore, MemoryLocalStore,
    MemoryRemoteStore, NetworkMonitor, NetworkQuality, PathObservation, SettingsStore,
    SyncConfig, SyncCoordinator, SyncEntity, SyncEvent, TimeoutConfig, Trigger,
};
use liftsync_model::{
    Day, DayStorage, Exercise, LocalSnapshot, RecordCodec, RecordId, RecordType, SetEntry, Split,
    WeightPoint, DAYS_REF, EXERCISES_REF,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Device {
    remote: Arc<MemoryRemoteStore>,
    local: Arc<MemoryLocalStore>,
    notifier: Arc<BroadcastNotifier>,
    coordinator: Arc<SyncCoordinator>,
}

async fn device(remote: &Arc<MemoryRemoteStore>, snapshot: LocalSnapshot) -> Device {
    device_with(remote, snapshot, Duration::from_secs(5), NetworkQuality::Excellent).await
}

async fn device_with(
    remote: &Arc<MemoryRemoteStore>,
    snapshot: LocalSnapshot,
    deadline: Duration,
    quality: NetworkQuality,
) -> Device {
    let local = Arc::new(MemoryLocalStore::with_snapshot(snapshot));
    let notifier = Arc::new(BroadcastNotifier::default());
    let coordinator = Arc::new(SyncCoordinator::new(
        SyncConfig::new().with_timeouts(TimeoutConfig::uniform(deadline)),
        Collaborators {
            remote: remote.clone(),
            local: local.clone(),
            assets: Arc::new(MemoryAssetStore::new()),
            notifier: notifier.clone(),
            settings: Arc::new(SettingsStore::in_memory()),
            network: Arc::new(NetworkMonitor::new(quality)),
        },
    ));
    coordinator.set_enabled(true).await.unwrap();
    Device {
        remote: remote.clone(),
        local,
        notifier,
        coordinator,
    }
}

fn ppl_split() -> Split {
    let day = |name: &str, order: i64, lifts: [&str; 3]| {
        lifts
            .iter()
            .enumerate()
            .fold(Day::new(name, order), |day, (i, lift)| {
                day.with_exercise(
                    Exercise::new(*lift, "3x8-10", i as i64).with_set(SetEntry::new(60.0, 8)),
                )
            })
    };
    let mut split = Split::new("Push/Pull")
        .with_day(day("Push", 0, ["Bench", "Overhead Press", "Dips"]))
        .with_day(day("Pull", 1, ["Deadlift", "Row", "Chin-up"]));
    split.is_active = true;
    split
}

fn snapshot_of(split: Split) -> LocalSnapshot {
    LocalSnapshot {
        splits: vec![split],
        ..LocalSnapshot::default()
    }
}

// ============================================================================
// Tree saves
// ============================================================================

#[tokio::test]
async fn tree_save_writes_children_before_parents() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, LocalSnapshot::default()).await;

    let report = d
        .coordinator
        .save_entity(&SyncEntity::Split(split.clone()))
        .await
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.counts.succeeded, 9);

    let saves = d.remote.saves();
    let finished = |id: &RecordId| {
        saves
            .iter()
            .find(|c| c.id.as_ref() == Some(id))
            .map(|c| (c.started, c.finished))
            .unwrap()
    };

    let (split_started, _) = finished(&split.record_id());
    for day in &split.days {
        let (day_started, day_finished) = finished(&day.record_id());
        assert!(day_finished < split_started, "day saved after its split");
        for exercise in &day.exercises {
            let (_, exercise_finished) = finished(&exercise.record_id());
            assert!(exercise_finished < day_started, "exercise saved after its day");
        }
    }
}

#[tokio::test]
async fn ppl_tree_lands_with_references() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, LocalSnapshot::default()).await;

    d.coordinator
        .full_sync(&snapshot_of(split.clone()), Trigger::Manual)
        .await
        .unwrap();

    assert_eq!(remote.records_of(RecordType::Exercise).len(), 6);
    assert_eq!(remote.records_of(RecordType::Day).len(), 2);
    for day in &split.days {
        let record = remote.get(&day.record_id()).unwrap();
        assert_eq!(record.referenced_keys(EXERCISES_REF).len(), 3);
    }
    let root = remote.get(&split.record_id()).unwrap();
    assert_eq!(
        root.referenced_keys(DAYS_REF),
        split.days.iter().map(|d| d.key.clone()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn saving_twice_is_idempotent() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, LocalSnapshot::default()).await;
    let entity = SyncEntity::Split(split.clone());

    d.coordinator.save_entity(&entity).await.unwrap();
    let first = remote.get(&split.record_id()).unwrap();
    let count = remote.len();

    d.coordinator.save_entity(&entity).await.unwrap();
    assert_eq!(remote.len(), count);
    assert_eq!(remote.get(&split.record_id()).unwrap(), first);
}

#[tokio::test]
async fn failed_exercise_is_dropped_but_tree_lands() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let broken = &split.days[0].exercises[1];
    remote.fail_key(broken.key.as_str(), "quota exceeded");
    let d = device(&remote, LocalSnapshot::default()).await;

    let report = d
        .coordinator
        .full_sync(&snapshot_of(split.clone()), Trigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.dropped().count(), 1);
    assert_eq!(report.retries_enqueued, 0);
    let day = remote.get(&split.days[0].record_id()).unwrap();
    assert_eq!(day.referenced_keys(EXERCISES_REF).len(), 2);
    assert!(remote.get(&split.record_id()).is_some());
}

#[tokio::test]
async fn deleting_a_split_cascades() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, LocalSnapshot::default()).await;
    d.coordinator
        .save_entity(&SyncEntity::Split(split.clone()))
        .await
        .unwrap();

    d.coordinator.delete_entity(&split.record_id()).await.unwrap();

    assert!(remote.records_of(RecordType::Split).is_empty());
    assert!(remote.records_of(RecordType::Day).is_empty());
    assert!(remote.records_of(RecordType::Exercise).is_empty());
}

// ============================================================================
// Timeouts and retries
// ============================================================================

#[tokio::test]
async fn timeouts_under_load_return_near_the_deadline() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let deadline = Duration::from_millis(100);
    let points: Vec<WeightPoint> = (0..20)
        .map(|i| WeightPoint::new(Utc::now() - ChronoDuration::days(i), 80.0))
        .collect();
    for point in &points {
        remote.hang_key(point.key.as_str());
    }
    let d = device_with(
        &remote,
        LocalSnapshot::default(),
        deadline,
        NetworkQuality::Excellent,
    )
    .await;
    let snapshot = LocalSnapshot {
        weight_points: points,
        ..LocalSnapshot::default()
    };

    let start = Instant::now();
    let report = d.coordinator.full_sync(&snapshot, Trigger::Manual).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.counts.timed_out, 20);
    assert_eq!(report.summary(), "0 synced, 20 will retry, 0 failed");
    assert!(elapsed < deadline + Duration::from_secs(1), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn retry_is_dropped_after_exactly_max_attempts() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let point = WeightPoint::new(Utc::now(), 81.5);
    remote.hang_key(point.key.as_str());
    let d = device(&remote, LocalSnapshot::default()).await;

    d.coordinator
        .save_entity(&SyncEntity::WeightPoint(point))
        .await
        .unwrap();
    let queue = d.coordinator.retry_queue();
    assert_eq!(queue.len(), 1);

    for attempt in 1..=2 {
        let report = d.coordinator.flush_retries().await.unwrap();
        assert_eq!(report.requeued, 1, "attempt {attempt}");
        assert_eq!(queue.pending()[0].retry_count, attempt);
    }

    let last = d.coordinator.flush_retries().await.unwrap();
    assert_eq!(last.dropped.len(), 1);
    assert!(queue.is_empty());

    let after = d.coordinator.flush_retries().await.unwrap();
    assert_eq!(after.skipped, Some(DrainSkip::Empty));
    assert_eq!(queue.drain_passes(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_of_a_split_resaves_the_whole_tree() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let hanging = split.days[1].key.clone();
    remote.hang_key(hanging.as_str());
    let d = device(&remote, LocalSnapshot::default()).await;

    let report = d
        .coordinator
        .save_entity(&SyncEntity::Split(split.clone()))
        .await
        .unwrap();
    assert_eq!(report.counts.timed_out, 1);
    assert_eq!(d.coordinator.retry_queue().len(), 1);
    let root = remote.get(&split.record_id()).unwrap();
    assert_eq!(root.referenced_keys(DAYS_REF).len(), 1);

    remote.release_key(hanging.as_str());
    let drained = d.coordinator.flush_retries().await.unwrap();
    assert_eq!(drained.succeeded, 1);
    let root = remote.get(&split.record_id()).unwrap();
    assert_eq!(root.referenced_keys(DAYS_REF).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn direct_quality_change_with_listener_drains_once() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let point = WeightPoint::new(Utc::now(), 80.0);
    remote.hang_key(point.key.as_str());
    let d = device_with(
        &remote,
        LocalSnapshot::default(),
        Duration::from_secs(5),
        NetworkQuality::Offline,
    )
    .await;
    d.coordinator
        .save_entity(&SyncEntity::WeightPoint(point.clone()))
        .await
        .unwrap();
    assert_eq!(d.coordinator.retry_queue().len(), 1);

    remote.release_key(point.key.as_str());
    remote.fail_key(point.key.as_str(), "quota exceeded");
    let listener = d.coordinator.spawn_network_listener();
    let mut events = d.notifier.subscribe();

    let report = d
        .coordinator
        .set_network_quality(NetworkQuality::Good)
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let queue = d.coordinator.retry_queue();
    assert_eq!(queue.drain_passes(), 1);
    assert_eq!(queue.pending()[0].retry_count, 1);
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::NetworkChanged {
            quality: NetworkQuality::Good
        }
    );
    assert!(events.try_recv().is_err());
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn network_recovery_drains_once() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let point = WeightPoint::new(Utc::now(), 80.0);
    remote.hang_key(point.key.as_str());
    let d = device_with(
        &remote,
        LocalSnapshot::default(),
        Duration::from_secs(5),
        NetworkQuality::Offline,
    )
    .await;

    d.coordinator
        .save_entity(&SyncEntity::WeightPoint(point.clone()))
        .await
        .unwrap();
    let skipped = d.coordinator.flush_retries().await.unwrap();
    assert_eq!(
        skipped.skipped,
        Some(DrainSkip::NetworkUnsuitable(NetworkQuality::Offline))
    );

    remote.release_key(point.key.as_str());
    let listener = d.coordinator.spawn_network_listener();
    let mut events = d.notifier.subscribe();

    d.coordinator.network().observe(PathObservation::wifi());
    for _ in 0..100 {
        if d.coordinator.retry_queue().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(d.coordinator.retry_queue().is_empty());
    assert!(remote.get(&point.record_id()).is_some());

    // Excellent -> Good stays in auto-sync territory and does not drain again.
    d.coordinator.network().set_quality(NetworkQuality::Good);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(d.coordinator.retry_queue().drain_passes(), 1);

    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::NetworkChanged {
            quality: NetworkQuality::Excellent
        }
    );
    listener.abort();
}

// ============================================================================
// Merge between devices
// ============================================================================

#[tokio::test]
async fn remote_newer_split_replaces_local() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let current = ppl_split();
    let mut stale = current.clone();
    stale.name = "Old name".into();
    stale.updated_at = current.updated_at - ChronoDuration::hours(1);

    let a = device(&remote, snapshot_of(current.clone())).await;
    a.coordinator
        .full_sync(&snapshot_of(current.clone()), Trigger::Manual)
        .await
        .unwrap();

    let b = device(&remote, snapshot_of(stale)).await;
    let report = b.coordinator.fetch_and_merge().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats_for(RecordType::Split).updated, 1);
    let merged = b.local.snapshot().unwrap();
    assert_eq!(merged.splits[0].name, current.name);
    assert_eq!(merged.splits[0].updated_at, current.updated_at);
}

#[tokio::test]
async fn local_newer_split_survives_merge() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let older = ppl_split();
    let mut newer = older.clone();
    newer.name = "Renamed here".into();
    newer.touch();

    let a = device(&remote, LocalSnapshot::default()).await;
    a.coordinator
        .full_sync(&snapshot_of(older), Trigger::Manual)
        .await
        .unwrap();

    let b = device(&remote, snapshot_of(newer.clone())).await;
    let report = b.coordinator.fetch_and_merge().await.unwrap();

    assert_eq!(report.stats_for(RecordType::Split).updated, 0);
    assert_eq!(b.local.snapshot().unwrap().splits[0].name, newer.name);
}

#[tokio::test]
async fn merge_leaves_exactly_one_active_split() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let mut first = ppl_split();
    let mut second = ppl_split();
    first.is_active = true;
    second.is_active = true;
    second.updated_at = first.updated_at + ChronoDuration::minutes(5);

    let a = device(&remote, LocalSnapshot::default()).await;
    let snapshot = LocalSnapshot {
        splits: vec![first, second.clone()],
        ..LocalSnapshot::default()
    };
    a.coordinator.full_sync(&snapshot, Trigger::Manual).await.unwrap();

    let b = device(&remote, LocalSnapshot::default()).await;
    b.coordinator.fetch_and_merge().await.unwrap();

    let merged = b.local.snapshot().unwrap();
    assert_eq!(merged.splits.len(), 2);
    assert_eq!(merged.active_split_count(), 1);
    assert!(merged.find_split(&second.key).unwrap().is_active);
    assert_eq!(merged.find_split(&second.key).unwrap().exercise_count(), 6);
}

#[tokio::test]
async fn failing_type_does_not_block_others() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let a = device(&remote, LocalSnapshot::default()).await;
    let point = WeightPoint::new(Utc::now(), 77.0);
    let snapshot = LocalSnapshot {
        splits: vec![ppl_split()],
        weight_points: vec![point.clone()],
        ..LocalSnapshot::default()
    };
    a.coordinator.full_sync(&snapshot, Trigger::Manual).await.unwrap();

    remote.fail_type(RecordType::Day, "server busy");
    let b = device(&remote, LocalSnapshot::default()).await;
    let report = b.coordinator.fetch_and_merge().await.unwrap();

    assert!(report.failures.contains_key(&RecordType::Day));
    assert_eq!(b.local.snapshot().unwrap().weight_points, vec![point]);
    assert!(b.coordinator.settings().last_synced_at().is_none());
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn history_date_collision_keeps_one_entry() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, snapshot_of(split.clone())).await;
    let date = "10 March 2025";

    let morning = DayStorage::for_day(date, &split.days[0], &split.name);
    let first = d.coordinator.record_history(morning).await.unwrap();
    assert_eq!(first.replaced_local, 0);
    assert_eq!(first.replaced_remote, 0);

    let evening = DayStorage::for_day(date, &split.days[1], &split.name);
    let second = d.coordinator.record_history(evening.clone()).await.unwrap();
    assert_eq!(second.replaced_local, 1);
    assert_eq!(second.replaced_remote, 1);
    assert!(second.remote.is_clean());

    let local = d.local.snapshot().unwrap();
    assert_eq!(local.day_storage, vec![evening.clone()]);
    assert!(local.duplicate_history_dates().is_empty());

    let stored = remote.records_of(RecordType::DayStorage);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].key(), &evening.key);
}

#[tokio::test(start_paused = true)]
async fn history_timeout_keeps_local_and_enqueues() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let split = ppl_split();
    let d = device(&remote, snapshot_of(split.clone())).await;
    let entry = DayStorage::for_day("11 March 2025", &split.days[0], &split.name);
    remote.hang_key(entry.key.as_str());

    let write = d.coordinator.record_history(entry.clone()).await.unwrap();
    assert_eq!(write.remote.counts.timed_out, 1);
    assert_eq!(d.local.snapshot().unwrap().day_storage, vec![entry.clone()]);
    assert_eq!(d.coordinator.retry_queue().len(), 1);

    remote.release_key(entry.key.as_str());
    d.coordinator.flush_retries().await.unwrap();
    assert!(remote.get(&entry.record_id()).is_some());
}
