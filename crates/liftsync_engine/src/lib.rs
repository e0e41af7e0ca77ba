//! # liftsync engine
//!
//! Synchronizes a local workout store with a remote keyed record store over
//! an unreliable network.
//!
//! This crate provides:
//! - Network quality monitor (excellent → good → poor → offline) with
//!   transition events
//! - Deadline guard around every remote call
//! - Remote store abstraction with an in-memory implementation
//! - Dependency-ordered save of split trees (children before parents)
//! - Bounded retry queue drained on network recovery
//! - Pure merge reconciler producing a plan of local mutations
//! - Sync coordinator tying it together behind enable/disable and session
//!   gating
//!
//! ## Architecture
//!
//! Writes flow local snapshot → [`SyncCoordinator`] → [`SaveOrchestrator`]
//! → [`GuardedRemote`]. Transient failures land in the [`RetryQueue`],
//! which drains when the [`NetworkMonitor`] reports a move into an
//! auto-sync quality. Pulls flow remote → [`reconcile`] → [`MergePlan`] →
//! [`LocalStore`].
//!
//! ## Key Invariants
//!
//! - A child record is written before any parent references it
//! - No remote call is issued without a deadline
//! - Upserts are idempotent; delivery is at-least-once
//! - Last-write-wins on a dedicated `updated_at` clock, one tree level at a time
//! - History and measurements are insert-if-absent
//! - At most one split is active after a merge

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coalesce;
mod config;
mod coordinator;
mod error;
mod local;
mod memory;
mod merge;
mod network;
mod notify;
mod orchestrator;
mod remote;
mod retry;
mod settings;
mod timeout;

pub use coalesce::{KeyValueSink, WriteCoalescer};
pub use config::{DeadlineClass, RetryConfig, SyncConfig, TimeoutConfig};
pub use coordinator::{
    Availability, Collaborators, HistoryWrite, MergeReport, SyncCoordinator, SyncEntity,
    SyncReport, SyncStats, Trigger,
};
pub use error::{FailureKind, SyncError, SyncResult};
pub use local::{
    AssetStore, DayFields, LocalMutation, LocalStore, MemoryAssetStore, MemoryLocalStore,
    SplitFields,
};
pub use memory::{CallKind, MemoryRemoteStore, RemoteCall};
pub use merge::{
    decode_each, photo_is_known, profile_is_newer, reconcile, MergePlan, RemoteEntities,
    RemoteNode, TypeMerge,
};
pub use network::{
    InterfaceKind, NetworkMonitor, NetworkQuality, PathObservation, QualityTransition,
};
pub use notify::{BroadcastNotifier, Notifier, SyncEvent};
pub use orchestrator::{DroppedChild, SaveCounts, SaveOrchestrator, SaveReport};
pub use remote::{
    AccountStatus, GuardedRemote, QueryOutcome, QueryPredicate, RecordQuery, RemoteStore,
};
pub use retry::{DrainReport, DrainSkip, PendingRetry, RetryEntry, RetryOperation, RetryQueue};
pub use settings::{
    JsonFileSink, MemorySink, SettingsStore, LAST_SYNCED_KEY, SYNC_ENABLED_KEY,
};
pub use timeout::guard;
