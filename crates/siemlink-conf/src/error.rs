//! # Design
//!
//! - Provide structured, constant-message errors for configuration editing.
//! - Capture operation context (paths, endpoints, line numbers) so failures
//!   are reproducible in tests.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::Endpoint;

/// Result type for configuration-editing operations.
pub type ConfResult<T> = Result<T, ConfError>;

/// Errors produced while editing the forwarding configuration file.
#[derive(Debug, Error)]
pub enum ConfError {
    /// The directory that should hold the configuration file is absent.
    #[error("configuration directory missing")]
    MissingDirectory {
        /// Directory that was expected to exist.
        path: PathBuf,
    },
    /// The existing configuration file could not be loaded.
    #[error("configuration read failure")]
    Read {
        /// Path that failed to load.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The pre-mutation backup snapshot could not be written.
    #[error("configuration backup failure")]
    Backup {
        /// Backup path that failed to materialize.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Persisting an installed rule-set failed.
    #[error("configuration write failure")]
    Write {
        /// Path that failed to persist.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Persisting a block removal failed.
    #[error("configuration block removal failure")]
    BlockRemoval {
        /// Path that failed to persist.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A begin marker has no matching end marker.
    #[error("corrupt forwarding block")]
    CorruptBlock {
        /// Endpoint whose block is malformed.
        endpoint: Endpoint,
        /// One-based line number of the dangling begin marker.
        line: usize,
    },
    /// Restoring the pre-mutation content failed after a write failure.
    ///
    /// The live file may be inconsistent; callers should escalate.
    #[error("configuration restore failure")]
    RestoreFailed {
        /// Path that could not be restored.
        path: PathBuf,
        /// Backup file used for the restore attempt, when one exists.
        backup: Option<PathBuf>,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl ConfError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn backup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Backup {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn block_removal(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::BlockRemoval {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn restore_failed(
        path: impl Into<PathBuf>,
        backup: Option<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::RestoreFailed {
            path: path.into(),
            backup,
            source,
        }
    }

    /// Whether the failure left the configuration file potentially
    /// inconsistent, warranting escalated reporting.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::RestoreFailed { .. })
    }
}
