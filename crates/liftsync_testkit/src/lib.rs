//! # liftsync Testkit
//!
//! Test utilities for liftsync.
//!
//! This crate provides:
//! - Canonical workout trees and sample snapshots
//! - A [`Harness`] wiring a coordinator to in-memory collaborators
//! - Property-based strategies using proptest
//!
//! Cross-crate scenario tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use liftsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn syncs_the_ppl_tree() {
//!     let harness = Harness::enabled().await;
//!     let snapshot = LocalSnapshot { splits: vec![ppl_split()], ..Default::default() };
//!     let report = harness.coordinator.full_sync(&snapshot, Trigger::Manual).await.unwrap();
//!     assert!(report.is_clean());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use liftsync_engine::{SyncEntity, Trigger};
    pub use liftsync_model::LocalSnapshot;
}

pub use fixtures::*;
pub use generators::*;
