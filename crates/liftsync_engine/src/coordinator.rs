//! Sync coordinator: the public surface of the engine.
//!
//! The coordinator is an explicitly constructed service. Callers own it
//! (usually behind an `Arc`) and pass it wherever sync is triggered; all
//! collaborators are injected through [`Collaborators`].
//!
//! ## Availability
//!
//! ```text
//! Disabled --(status check ok)--> Enabled --(set_enabled(false) | permanent account error)--> Disabled
//! ```
//!
//! While disabled every operation fails fast with
//! [`SyncError::NotAvailable`]. The session flag is orthogonal: while a
//! latency-sensitive session is active, automatic full syncs are skipped;
//! manual calls still run.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::{AssetStore, LocalMutation, LocalStore};
use crate::merge::{
    decode_each, photo_is_known, profile_is_newer, reconcile, MergePlan, RemoteEntities,
    RemoteNode, TypeMerge,
};
use crate::network::{NetworkMonitor, NetworkQuality, QualityTransition};
use crate::notify::{Notifier, SyncEvent};
use crate::orchestrator::{DroppedChild, SaveCounts, SaveOrchestrator, SaveReport};
use crate::remote::{AccountStatus, GuardedRemote, RecordQuery, RemoteStore};
use crate::retry::{DrainReport, RetryQueue};
use crate::settings::SettingsStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use liftsync_model::{
    Day, DayStorage, EntityKey, Exercise, LocalSnapshot, ModelResult, ProgressPhoto, Record,
    RecordCodec, RecordId, RecordType, Split, UserProfile, WeightPoint, IMAGE_FIELD,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Whether the coordinator accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Availability {
    /// Every operation fails with `NotAvailable`.
    Disabled,
    /// Operations run.
    Enabled,
}

/// Who asked for a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An explicit user or caller request. Always honored when enabled.
    Manual,
    /// A background trigger. Skipped during an active session and
    /// refused on poor networks.
    Automatic,
}

/// An entity that can be written to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEntity {
    /// A split with its whole tree.
    Split(Split),
    /// A history entry.
    DayStorage(DayStorage),
    /// A weight measurement.
    WeightPoint(WeightPoint),
    /// The profile, image included.
    Profile(UserProfile),
    /// A progress photo, image included.
    Photo(ProgressPhoto),
}

impl SyncEntity {
    /// Remote address of the entity's top-level record.
    pub fn record_id(&self) -> RecordId {
        match self {
            SyncEntity::Split(split) => split.record_id(),
            SyncEntity::DayStorage(entry) => entry.record_id(),
            SyncEntity::WeightPoint(point) => point.record_id(),
            SyncEntity::Profile(_) => UserProfile::record_id(),
            SyncEntity::Photo(photo) => photo.record_id(),
        }
    }

    /// Every top-level entity in a snapshot, splits first.
    pub fn all_from(snapshot: &LocalSnapshot) -> Vec<SyncEntity> {
        let mut entities: Vec<SyncEntity> =
            snapshot.splits.iter().cloned().map(SyncEntity::Split).collect();
        entities.extend(snapshot.day_storage.iter().cloned().map(SyncEntity::DayStorage));
        entities.extend(snapshot.weight_points.iter().cloned().map(SyncEntity::WeightPoint));
        entities.extend(snapshot.profile.iter().cloned().map(SyncEntity::Profile));
        entities.extend(snapshot.photos.iter().cloned().map(SyncEntity::Photo));
        entities
    }
}

/// Injected collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Remote record store.
    pub remote: Arc<dyn RemoteStore>,
    /// On-device store.
    pub local: Arc<dyn LocalStore>,
    /// Binary asset store.
    pub assets: Arc<dyn AssetStore>,
    /// Completion event sink.
    pub notifier: Arc<dyn Notifier>,
    /// Durable settings.
    pub settings: Arc<SettingsStore>,
    /// Network quality source.
    pub network: Arc<NetworkMonitor>,
}

/// Counters across the coordinator's lifetime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Full syncs that ran.
    pub cycles_completed: u64,
    /// Records written.
    pub records_saved: u64,
    /// Record writes that timed out.
    pub timeouts: u64,
    /// Record writes that failed.
    pub failures: u64,
    /// Fetch-and-merge calls that ran.
    pub merges_completed: u64,
    /// Retry queue drain passes requested.
    pub drains: u64,
    /// Retries enqueued automatically.
    pub retries_enqueued: u64,
    /// Last successful sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of a full sync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// One report per top-level entity.
    pub entities: Vec<SaveReport>,
    /// Counts across every record written.
    pub counts: SaveCounts,
    /// Retries enqueued for entities with timeouts.
    pub retries_enqueued: usize,
    /// True if an active session suppressed the sync.
    pub suppressed: bool,
}

impl SyncReport {
    fn skipped_for_session() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }

    /// User-facing summary, e.g. "12 synced, 1 will retry, 0 failed".
    pub fn summary(&self) -> String {
        format!(
            "{} synced, {} will retry, {} failed",
            self.counts.succeeded, self.counts.timed_out, self.counts.failed
        )
    }

    /// Children omitted from their parents across all entities.
    pub fn dropped(&self) -> impl Iterator<Item = &DroppedChild> {
        self.entities.iter().flat_map(|e| e.dropped.iter())
    }

    /// Returns true if every record was written.
    pub fn is_clean(&self) -> bool {
        !self.suppressed && self.entities.iter().all(SaveReport::is_clean)
    }
}

/// Outcome of a fetch-and-merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Merge decisions per type.
    pub stats: BTreeMap<RecordType, TypeMerge>,
    /// Local mutations applied.
    pub applied: usize,
    /// Types whose pull or local write failed, with the reason.
    pub failures: BTreeMap<RecordType, String>,
    /// Remote records skipped as malformed.
    pub invalid: usize,
    /// Split made active by the single-active check.
    pub activated: Option<EntityKey>,
}

impl MergeReport {
    fn record_failure(&mut self, record_type: RecordType, error: &SyncError) {
        warn!(record_type = %record_type, error = %error, "merge of type failed");
        self.failures.insert(record_type, error.to_string());
    }

    /// Returns true if every type merged.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Decisions for one type.
    pub fn stats_for(&self, record_type: RecordType) -> TypeMerge {
        self.stats.get(&record_type).copied().unwrap_or_default()
    }
}

/// Result of writing a history entry.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryWrite {
    /// Local entries with the same date that were removed.
    pub replaced_local: usize,
    /// Remote entries with the same date that were deleted.
    pub replaced_remote: usize,
    /// Outcome of the remote half.
    pub remote: SaveReport,
}

/// Writes entities to the remote store. Cloned into retry operations.
#[derive(Clone)]
struct EntityWriter {
    remote: GuardedRemote,
    orchestrator: SaveOrchestrator,
    assets: Arc<dyn AssetStore>,
}

impl EntityWriter {
    async fn save(&self, entity: &SyncEntity) -> SaveReport {
        let result = match entity {
            SyncEntity::Split(split) => return self.orchestrator.save_split(split).await,
            SyncEntity::DayStorage(entry) => self.upsert_encoded(entry.to_record()).await,
            SyncEntity::WeightPoint(point) => self.upsert_encoded(point.to_record()).await,
            SyncEntity::Profile(profile) => self.save_profile(profile).await,
            SyncEntity::Photo(photo) => self.save_photo(photo).await,
        };
        SaveReport::single(entity.record_id(), &result)
    }

    async fn upsert(&self, record: Record) -> SyncResult<()> {
        self.remote.upsert(record).await.map(|_| ())
    }

    async fn upsert_encoded(&self, record: ModelResult<Record>) -> SyncResult<()> {
        self.upsert(record?).await
    }

    async fn save_profile(&self, profile: &UserProfile) -> SyncResult<()> {
        let image = profile
            .image
            .as_ref()
            .map(|asset| self.assets.load(asset))
            .transpose()?;
        self.upsert(profile.to_record(image)).await
    }

    async fn save_photo(&self, photo: &ProgressPhoto) -> SyncResult<()> {
        let image = self.assets.load(&photo.asset)?;
        self.upsert(photo.to_record(image)).await
    }

    /// Deletes remote history entries sharing `entry`'s date, then upserts it.
    async fn replace_history(&self, entry: &DayStorage) -> SyncResult<usize> {
        let query =
            RecordQuery::field_equals(RecordType::DayStorage, "date", entry.date.as_str());
        let mut replaced = 0;
        for record in self.remote.query_records(&query).await? {
            if record.key() != &entry.key {
                self.remote.delete(&record.id).await?;
                replaced += 1;
            }
        }
        self.upsert_encoded(entry.to_record()).await?;
        Ok(replaced)
    }
}

fn incomplete(report: &SaveReport) -> SyncError {
    match &report.error {
        Some(error) if report.counts.timed_out == 0 => SyncError::SyncFailed(error.clone()),
        _ => SyncError::SyncFailed(format!(
            "save {} incomplete: {} timed out, {} failed",
            report.target, report.counts.timed_out, report.counts.failed
        )),
    }
}

/// The sync engine's public surface.
pub struct SyncCoordinator {
    config: SyncConfig,
    writer: EntityWriter,
    retry: Arc<RetryQueue>,
    local: Arc<dyn LocalStore>,
    assets: Arc<dyn AssetStore>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SettingsStore>,
    network: Arc<NetworkMonitor>,
    availability: RwLock<Availability>,
    session_active: AtomicBool,
    last_transition: AtomicU64,
    stats: RwLock<SyncStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator. It starts disabled; call
    /// [`check_status`](Self::check_status) or [`set_enabled`](Self::set_enabled).
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        let remote = GuardedRemote::new(collaborators.remote, config.timeouts.clone());
        let writer = EntityWriter {
            orchestrator: SaveOrchestrator::new(remote.clone()),
            remote,
            assets: Arc::clone(&collaborators.assets),
        };
        Self {
            retry: Arc::new(RetryQueue::new(config.retry.max_retries)),
            config,
            writer,
            local: collaborators.local,
            assets: collaborators.assets,
            notifier: collaborators.notifier,
            settings: collaborators.settings,
            network: collaborators.network,
            availability: RwLock::new(Availability::Disabled),
            session_active: AtomicBool::new(false),
            last_transition: AtomicU64::new(0),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Current availability.
    pub fn availability(&self) -> Availability {
        *self.availability.read()
    }

    /// Returns true if operations are accepted.
    pub fn is_enabled(&self) -> bool {
        self.availability() == Availability::Enabled
    }

    /// Current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The retry queue.
    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry
    }

    /// The network monitor.
    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    /// The settings store.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    fn set_availability(&self, next: Availability) {
        let previous = std::mem::replace(&mut *self.availability.write(), next);
        if previous != next {
            info!(from = ?previous, to = ?next, "sync availability changed");
            self.notifier.notify(SyncEvent::AvailabilityChanged {
                enabled: next == Availability::Enabled,
            });
        }
    }

    fn ensure_enabled(&self) -> SyncResult<()> {
        match self.availability() {
            Availability::Enabled => Ok(()),
            Availability::Disabled => Err(SyncError::NotAvailable("sync is disabled".into())),
        }
    }

    fn handle_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
    }

    /// Checks the persisted toggle and the remote account.
    ///
    /// Moves to `Enabled` when the toggle is on and the account is usable;
    /// a permanent account error moves to `Disabled`. A temporary account
    /// problem leaves the state as it was.
    pub async fn check_status(&self) -> SyncResult<Availability> {
        if !self.settings.sync_enabled() {
            self.set_availability(Availability::Disabled);
            return Ok(Availability::Disabled);
        }
        let status = match self.writer.remote.account_status().await {
            Ok(status) => status,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };
        match status {
            AccountStatus::Available => {
                self.set_availability(Availability::Enabled);
                Ok(Availability::Enabled)
            }
            status if status.is_permanent_error() => {
                self.set_availability(Availability::Disabled);
                let error =
                    SyncError::NotAvailable(format!("remote account unusable: {status:?}"));
                self.handle_error(&error);
                Err(error)
            }
            status => {
                debug!(?status, "account status temporarily unknown");
                Err(SyncError::NotAvailable(format!("remote account status: {status:?}")))
            }
        }
    }

    /// Persists the sync toggle and updates availability.
    ///
    /// Disabling stops new operations; in-flight ones run to completion.
    pub async fn set_enabled(&self, enabled: bool) -> SyncResult<Availability> {
        self.settings.set_sync_enabled(enabled);
        if enabled {
            self.check_status().await
        } else {
            self.set_availability(Availability::Disabled);
            Ok(Availability::Disabled)
        }
    }

    /// Marks a latency-sensitive session (a workout in progress) as active.
    pub fn set_session_active(&self, active: bool) {
        let was = self.session_active.swap(active, Ordering::SeqCst);
        if was != active {
            info!(active, "session flag changed");
        }
    }

    /// Returns true while a session is active.
    pub fn is_session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    /// Writes one entity: a tree save for splits, an upsert otherwise.
    pub async fn save_entity(&self, entity: &SyncEntity) -> SyncResult<SaveReport> {
        self.ensure_enabled()?;
        let (report, _) = self.save_tracked(entity).await;
        Ok(report)
    }

    async fn save_tracked(&self, entity: &SyncEntity) -> (SaveReport, bool) {
        let report = self.writer.save(entity).await;

        let enqueued = self.config.retry.auto_enqueue && report.has_transient_failures();
        if enqueued {
            self.enqueue_entity_retry(entity);
        }

        let mut stats = self.stats.write();
        stats.records_saved += report.counts.succeeded as u64;
        stats.timeouts += report.counts.timed_out as u64;
        stats.failures += report.counts.failed as u64;
        if enqueued {
            stats.retries_enqueued += 1;
        }
        if let Some(error) = &report.error {
            stats.last_error = Some(error.clone());
        }
        (report, enqueued)
    }

    fn enqueue_entity_retry(&self, entity: &SyncEntity) {
        let writer = self.writer.clone();
        let entity = entity.clone();
        let description = format!("save {}", entity.record_id());
        self.retry.enqueue(description, move || {
            let writer = writer.clone();
            let entity = entity.clone();
            async move {
                let report = writer.save(&entity).await;
                if report.is_clean() {
                    Ok(())
                } else {
                    Err(incomplete(&report))
                }
            }
        });
    }

    /// Issues a remote delete. Owned children cascade in the store.
    pub async fn delete_entity(&self, id: &RecordId) -> SyncResult<()> {
        self.ensure_enabled()?;
        let result = self.writer.remote.delete(id).await;
        match &result {
            Ok(()) => info!(record = %id, "remote record deleted"),
            Err(e) => self.handle_error(e),
        }
        result
    }

    /// Records a history entry, replacing any entry for the same date.
    ///
    /// Locally, entries with the same date are deleted and the new one
    /// inserted and committed. Remotely, same-date records are deleted
    /// before the new one is upserted. A remote timeout enqueues a retry of
    /// the remote half.
    pub async fn record_history(&self, entry: DayStorage) -> SyncResult<HistoryWrite> {
        self.ensure_enabled()?;

        let snapshot = self.local.snapshot()?;
        let stale: Vec<_> = snapshot
            .day_storage
            .iter()
            .filter(|h| h.date == entry.date && h.key != entry.key)
            .map(|h| h.key.clone())
            .collect();
        for key in &stale {
            self.local.apply(&LocalMutation::DeleteDayStorage(key.clone()))?;
        }
        self.local.apply(&LocalMutation::InsertDayStorage(entry.clone()))?;
        self.local.commit()?;

        let result = self.writer.replace_history(&entry).await;
        let replaced_remote = *result.as_ref().unwrap_or(&0);
        let report = SaveReport::single(entry.record_id(), &result);

        if let Err(e) = &result {
            self.handle_error(e);
            if e.is_retryable() && self.config.retry.auto_enqueue {
                let writer = self.writer.clone();
                let entry = entry.clone();
                self.retry.enqueue(format!("record history {}", entry.date), move || {
                    let writer = writer.clone();
                    let entry = entry.clone();
                    async move { writer.replace_history(&entry).await.map(|_| ()) }
                });
                self.stats.write().retries_enqueued += 1;
            }
        }

        info!(
            date = %entry.date,
            replaced_local = stale.len(),
            replaced_remote,
            saved = report.saved,
            "history entry recorded"
        );
        Ok(HistoryWrite {
            replaced_local: stale.len(),
            replaced_remote,
            remote: report,
        })
    }

    /// Writes every entity in `snapshot`, without rollback on partial failure.
    ///
    /// Automatic triggers are suppressed while a session is active and
    /// refused with [`SyncError::PoorNetworkQuality`] when the network does
    /// not permit automatic syncs.
    pub async fn full_sync(
        &self,
        snapshot: &LocalSnapshot,
        trigger: Trigger,
    ) -> SyncResult<SyncReport> {
        self.ensure_enabled()?;
        if trigger == Trigger::Automatic {
            if self.is_session_active() {
                debug!("automatic sync suppressed during active session");
                return Ok(SyncReport::skipped_for_session());
            }
            let quality = self.network.current();
            if !quality.should_auto_sync() {
                return Err(SyncError::PoorNetworkQuality(quality));
            }
        }

        let entities = SyncEntity::all_from(snapshot);
        let outcomes = join_all(entities.iter().map(|e| self.save_tracked(e))).await;

        let mut report = SyncReport::default();
        for (entity_report, enqueued) in outcomes {
            report.counts.merge(entity_report.counts);
            report.retries_enqueued += usize::from(enqueued);
            report.entities.push(entity_report);
        }

        let clean = report.is_clean();
        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            if clean {
                let now = Utc::now();
                stats.last_sync_time = Some(now);
                stats.last_error = None;
                self.settings.set_last_synced_at(now);
            }
        }

        info!(
            entities = report.entities.len(),
            summary = %report.summary(),
            retries_enqueued = report.retries_enqueued,
            "full sync finished"
        );
        self.notifier.notify(SyncEvent::FullSyncCompleted {
            synced: report.counts.succeeded,
            will_retry: report.counts.timed_out,
            failed: report.counts.failed,
        });
        Ok(report)
    }

    /// Pulls every remote type, merges it into the local store and notifies
    /// observers.
    ///
    /// A failure pulling or writing one type is recorded in the report and
    /// does not stop the other types. Mutations already committed stay.
    pub async fn fetch_and_merge(&self) -> SyncResult<MergeReport> {
        self.ensure_enabled()?;
        let snapshot = self.local.snapshot()?;
        let mut report = MergeReport::default();

        let remote = RemoteEntities {
            splits: self
                .pull(RecordType::Split, &mut report, RemoteNode::<Split>::from_split_record)
                .await,
            days: self
                .pull(RecordType::Day, &mut report, RemoteNode::<Day>::from_day_record)
                .await,
            exercises: self
                .pull(RecordType::Exercise, &mut report, |r| {
                    Exercise::from_record(r).map_err(SyncError::from)
                })
                .await,
            day_storage: self
                .pull(RecordType::DayStorage, &mut report, |r| {
                    DayStorage::from_record(r).map_err(SyncError::from)
                })
                .await,
            weight_points: self
                .pull(RecordType::WeightPoint, &mut report, |r| {
                    WeightPoint::from_record(r).map_err(SyncError::from)
                })
                .await,
            profile: match self.pull_profile(&snapshot).await {
                Ok(profile) => profile,
                Err(e) => {
                    report.record_failure(RecordType::UserProfile, &e);
                    None
                }
            },
            photos: match self.pull_photos(&snapshot, &mut report).await {
                Ok(photos) => Some(photos),
                Err(e) => {
                    report.record_failure(RecordType::ProgressPhoto, &e);
                    None
                }
            },
        };

        let plan = reconcile(&snapshot, &remote);
        for record_type in RecordType::ALL {
            match self.apply_type(&plan, record_type) {
                Ok(applied) => report.applied += applied,
                Err(e) => report.record_failure(record_type, &e),
            }
        }
        report.stats = plan.stats;
        report.activated = plan.activated;

        {
            let mut stats = self.stats.write();
            stats.merges_completed += 1;
            if report.is_clean() {
                stats.last_sync_time = Some(Utc::now());
            } else {
                stats.last_error = report.failures.values().next().cloned();
            }
        }
        if report.is_clean() {
            self.settings.set_last_synced_at(Utc::now());
        }

        info!(
            applied = report.applied,
            failed_types = report.failures.len(),
            invalid = report.invalid,
            "fetch and merge finished"
        );
        self.notifier.notify(SyncEvent::MergeCompleted {
            applied: report.applied,
        });
        Ok(report)
    }

    async fn pull<T, F>(
        &self,
        record_type: RecordType,
        report: &mut MergeReport,
        decode: F,
    ) -> Option<Vec<T>>
    where
        F: Fn(&Record) -> SyncResult<T>,
    {
        match self.writer.remote.fetch_all(record_type).await {
            Ok(records) => {
                let (decoded, invalid) = decode_each(&records, decode);
                debug!(
                    record_type = %record_type,
                    pulled = decoded.len(),
                    invalid,
                    "remote type pulled"
                );
                report.invalid += invalid;
                Some(decoded)
            }
            Err(e) => {
                report.record_failure(record_type, &e);
                None
            }
        }
    }

    /// Fetches the profile, materializing its image only when the remote
    /// copy will win.
    async fn pull_profile(&self, local: &LocalSnapshot) -> SyncResult<Option<UserProfile>> {
        let Some(record) = self.writer.remote.fetch(&UserProfile::record_id()).await? else {
            return Ok(None);
        };
        if !profile_is_newer(local, record.timestamp("updatedAt")?) {
            let current = local.profile.as_ref().and_then(|p| p.image.clone());
            return Ok(Some(UserProfile::from_record(&record, current)?));
        }
        let image = match record.bytes_opt(IMAGE_FIELD)? {
            Some(bytes) => Some(self.assets.persist(bytes)?),
            None => None,
        };
        Ok(Some(UserProfile::from_record(&record, image)?))
    }

    /// Fetches photos missing locally and materializes their images.
    async fn pull_photos(
        &self,
        local: &LocalSnapshot,
        report: &mut MergeReport,
    ) -> SyncResult<Vec<ProgressPhoto>> {
        let records = self.writer.remote.fetch_all(RecordType::ProgressPhoto).await?;
        let fresh: Vec<Record> = records
            .into_iter()
            .filter(|r| !photo_is_known(local, r.key()))
            .collect();
        let (photos, invalid) = decode_each(&fresh, |record| self.materialize_photo(record));
        report.invalid += invalid;
        Ok(photos)
    }

    fn materialize_photo(&self, record: &Record) -> SyncResult<ProgressPhoto> {
        record.timestamp("takenAt")?;
        let asset = self.assets.persist(record.bytes(IMAGE_FIELD)?)?;
        Ok(ProgressPhoto::from_record(record, asset)?)
    }

    fn apply_type(&self, plan: &MergePlan, record_type: RecordType) -> SyncResult<usize> {
        let mut applied = 0;
        for mutation in plan.mutations_for(record_type) {
            if let Err(e) = self.local.apply(mutation) {
                self.local.discard();
                return Err(e);
            }
            applied += 1;
        }
        if applied > 0 {
            self.local.commit()?;
        }
        Ok(applied)
    }

    /// Drains the retry queue at the current network quality.
    pub async fn flush_retries(&self) -> SyncResult<DrainReport> {
        self.ensure_enabled()?;
        self.stats.write().drains += 1;
        Ok(self.retry.drain(self.network.current()).await)
    }

    /// Reacts to a network quality change.
    ///
    /// A move into an auto-sync quality drains the retry queue once.
    /// Each transition is handled at most once, however many paths deliver
    /// it; stale or repeated ones are ignored. Returns the drain report when
    /// a drain was attempted.
    pub async fn handle_transition(&self, transition: QualityTransition) -> Option<DrainReport> {
        let seen = self.last_transition.fetch_max(transition.seq, Ordering::SeqCst);
        if seen >= transition.seq {
            debug!(seq = transition.seq, "transition already handled");
            return None;
        }
        self.notifier.notify(SyncEvent::NetworkChanged {
            quality: transition.to,
        });
        if !transition.enables_auto_sync() || !self.is_enabled() {
            return None;
        }
        info!(
            from = %transition.from,
            to = %transition.to,
            queued = self.retry.len(),
            "network recovered, draining retries"
        );
        self.stats.write().drains += 1;
        Some(self.retry.drain(transition.to).await)
    }

    /// Sets network quality directly and handles the resulting transition.
    ///
    /// Returns `None` when quality did not change, when the transition does
    /// not drain, or when a running network listener handled it first.
    pub async fn set_network_quality(&self, quality: NetworkQuality) -> Option<DrainReport> {
        let transition = self.network.set_quality(quality)?;
        self.handle_transition(transition).await
    }

    /// Spawns a task that handles every transition published by the
    /// network monitor.
    ///
    /// The task holds only a weak handle and ends once the coordinator is
    /// dropped or the monitor's channel closes.
    pub fn spawn_network_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut transitions = self.network.subscribe();
        let coordinator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(transition) => {
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        coordinator.handle_transition(transition).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "network listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("network listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, TimeoutConfig};
    use crate::local::{MemoryAssetStore, MemoryLocalStore};
    use crate::memory::MemoryRemoteStore;
    use crate::notify::BroadcastNotifier;
    use std::time::Duration;

    struct Fixture {
        remote: Arc<MemoryRemoteStore>,
        local: Arc<MemoryLocalStore>,
        coordinator: SyncCoordinator,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let coordinator = SyncCoordinator::new(
            config,
            Collaborators {
                remote: remote.clone(),
                local: local.clone(),
                assets: Arc::new(MemoryAssetStore::new()),
                notifier: Arc::new(BroadcastNotifier::default()),
                settings: Arc::new(SettingsStore::in_memory()),
                network: Arc::new(NetworkMonitor::new(NetworkQuality::Excellent)),
            },
        );
        Fixture {
            remote,
            local,
            coordinator,
        }
    }

    fn config() -> SyncConfig {
        SyncConfig::new().with_timeouts(TimeoutConfig::uniform(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn disabled_fails_fast() {
        let f = fixture(config());
        let result = f
            .coordinator
            .save_entity(&SyncEntity::WeightPoint(WeightPoint::new(Utc::now(), 80.0)))
            .await;
        assert!(matches!(result, Err(SyncError::NotAvailable(_))));
        assert!(f.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn enable_checks_account() {
        let f = fixture(config());
        assert_eq!(
            f.coordinator.set_enabled(true).await.unwrap(),
            Availability::Enabled
        );
        assert!(f.coordinator.settings().sync_enabled());

        f.remote.set_account_status(AccountStatus::NoAccount);
        assert!(f.coordinator.check_status().await.is_err());
        assert_eq!(f.coordinator.availability(), Availability::Disabled);
    }

    #[tokio::test]
    async fn temporary_account_problem_keeps_state() {
        let f = fixture(config());
        f.coordinator.set_enabled(true).await.unwrap();
        f.remote.set_account_status(AccountStatus::TemporarilyUnavailable);
        assert!(f.coordinator.check_status().await.is_err());
        assert_eq!(f.coordinator.availability(), Availability::Enabled);
    }

    #[tokio::test]
    async fn automatic_sync_respects_session_and_network() {
        let f = fixture(config());
        f.coordinator.set_enabled(true).await.unwrap();
        let snapshot = LocalSnapshot {
            weight_points: vec![WeightPoint::new(Utc::now(), 80.0)],
            ..LocalSnapshot::default()
        };

        f.coordinator.set_session_active(true);
        let report = f
            .coordinator
            .full_sync(&snapshot, Trigger::Automatic)
            .await
            .unwrap();
        assert!(report.suppressed);
        assert!(f.remote.is_empty());

        let manual = f.coordinator.full_sync(&snapshot, Trigger::Manual).await.unwrap();
        assert_eq!(manual.counts.succeeded, 1);

        f.coordinator.set_session_active(false);
        f.coordinator.network().set_quality(NetworkQuality::Poor);
        let refused = f.coordinator.full_sync(&snapshot, Trigger::Automatic).await;
        assert!(matches!(
            refused,
            Err(SyncError::PoorNetworkQuality(NetworkQuality::Poor))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_enqueues_one_retry() {
        let f = fixture(config());
        f.coordinator.set_enabled(true).await.unwrap();
        let point = WeightPoint::new(Utc::now(), 80.0);
        f.remote.hang_key(point.key.as_str());

        let report = f
            .coordinator
            .save_entity(&SyncEntity::WeightPoint(point.clone()))
            .await
            .unwrap();
        assert_eq!(report.counts.timed_out, 1);
        assert_eq!(f.coordinator.retry_queue().len(), 1);

        f.remote.release_key(point.key.as_str());
        let drained = f.coordinator.flush_retries().await.unwrap();
        assert_eq!(drained.succeeded, 1);
        assert!(f.remote.get(&point.record_id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_only_retry_config_enqueues_nothing() {
        let f = fixture(config().with_retry(RetryConfig::default().manual_only()));
        f.coordinator.set_enabled(true).await.unwrap();
        let point = WeightPoint::new(Utc::now(), 80.0);
        f.remote.hang_key(point.key.as_str());

        f.coordinator
            .save_entity(&SyncEntity::WeightPoint(point))
            .await
            .unwrap();
        assert!(f.coordinator.retry_queue().is_empty());
    }

    #[tokio::test]
    async fn merge_writes_local_store() {
        let f = fixture(config());
        f.coordinator.set_enabled(true).await.unwrap();
        let point = WeightPoint::new(Utc::now(), 79.0);
        f.remote.insert(point.to_record().unwrap());

        let report = f.coordinator.fetch_and_merge().await.unwrap();
        assert_eq!(report.stats_for(RecordType::WeightPoint).inserted, 1);
        assert_eq!(f.local.snapshot().unwrap().weight_points, vec![point]);
        assert!(f.coordinator.settings().last_synced_at().is_some());
    }

    /// Local store that rejects the second history insert.
    struct FlakyLocal {
        inner: MemoryLocalStore,
        history_inserts: AtomicU64,
    }

    impl LocalStore for FlakyLocal {
        fn snapshot(&self) -> SyncResult<LocalSnapshot> {
            self.inner.snapshot()
        }

        fn apply(&self, mutation: &LocalMutation) -> SyncResult<()> {
            if matches!(mutation, LocalMutation::InsertDayStorage(_))
                && self.history_inserts.fetch_add(1, Ordering::SeqCst) == 1
            {
                return Err(SyncError::Storage("constraint violation".into()));
            }
            self.inner.apply(mutation)
        }

        fn commit(&self) -> SyncResult<()> {
            self.inner.commit()
        }

        fn discard(&self) {
            self.inner.discard()
        }
    }

    #[tokio::test]
    async fn failed_type_is_not_half_applied() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let day = Day::new("Push", 0);
        for date in ["10 March 2025", "11 March 2025"] {
            remote.insert(DayStorage::for_day(date, &day, "PPL").to_record().unwrap());
        }
        let point = WeightPoint::new(Utc::now(), 80.0);
        remote.insert(point.to_record().unwrap());

        let local = Arc::new(FlakyLocal {
            inner: MemoryLocalStore::new(),
            history_inserts: AtomicU64::new(0),
        });
        let coordinator = SyncCoordinator::new(
            config(),
            Collaborators {
                remote,
                local: local.clone(),
                assets: Arc::new(MemoryAssetStore::new()),
                notifier: Arc::new(BroadcastNotifier::default()),
                settings: Arc::new(SettingsStore::in_memory()),
                network: Arc::new(NetworkMonitor::new(NetworkQuality::Excellent)),
            },
        );
        coordinator.set_enabled(true).await.unwrap();

        let report = coordinator.fetch_and_merge().await.unwrap();

        assert!(report.failures.contains_key(&RecordType::DayStorage));
        let merged = local.snapshot().unwrap();
        assert!(merged.day_storage.is_empty());
        assert_eq!(merged.weight_points, vec![point]);
        assert!(coordinator.settings().last_synced_at().is_none());
    }

    #[test]
    fn summary_wording() {
        let report = SyncReport {
            counts: SaveCounts {
                succeeded: 12,
                timed_out: 1,
                failed: 0,
            },
            ..SyncReport::default()
        };
        assert_eq!(report.summary(), "12 synced, 1 will retry, 0 failed");
    }
}
