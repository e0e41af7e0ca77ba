//! CLI command implementations.

pub mod inspect;
pub mod simulate;

use liftsync_engine::SyncError;
use liftsync_model::LocalSnapshot;
use std::path::Path;
use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The snapshot file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The snapshot file is not a valid snapshot.
    #[error("invalid snapshot {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The engine refused or failed an operation.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Reads a JSON snapshot.
pub fn load_snapshot(path: &Path) -> Result<LocalSnapshot, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}
