//! Install, replacement, and removal of forwarding blocks with a
//! backup-and-restore discipline.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

use crate::document::Document;
use crate::error::{ConfError, ConfResult};
use crate::model::{Endpoint, InstalledBlock, Transport};
use crate::store::{ConfStore, DiskStore};

/// Timestamp layout embedded in backup file names.
const BACKUP_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Bound on same-second backup name collisions before the run is abandoned.
const BACKUP_COLLISION_LIMIT: u32 = 1000;

/// Which mutation a failed persist belongs to, for error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MutationKind {
    Append,
    Removal,
}

/// Result of a single configuration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The configuration file changed; a service reload is warranted.
    Changed {
        /// Backup snapshot taken before the mutation, when the file existed.
        backup: Option<PathBuf>,
        /// Whether the mutation removed a pre-existing block for the
        /// endpoint.
        replaced: bool,
    },
    /// Nothing needed doing; the file was not touched.
    Unchanged,
}

impl Outcome {
    /// Whether the operation mutated the configuration file.
    #[must_use]
    pub const fn mutated(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// Whether the mutation removed a pre-existing block for the endpoint.
    /// For an install this is what separates a replacement from a fresh
    /// block.
    #[must_use]
    pub const fn replaced(&self) -> bool {
        matches!(self, Self::Changed { replaced: true, .. })
    }

    /// Backup path recorded for the mutation, when one was taken.
    #[must_use]
    pub fn backup(&self) -> Option<&Path> {
        match self {
            Self::Changed { backup, .. } => backup.as_deref(),
            Self::Unchanged => None,
        }
    }
}

/// Service owning all reads and writes of the forwarding configuration file.
///
/// Every mutating operation follows the same shape: load, snapshot, edit the
/// in-memory document, persist once. A persist failure triggers exactly one
/// restore of the pre-edit content before the error is reported.
#[derive(Debug, Clone)]
pub struct ConfService<S: ConfStore = DiskStore> {
    path: PathBuf,
    store: S,
}

impl ConfService {
    /// Service for `path` backed by the local filesystem.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_store(path, DiskStore)
    }
}

impl<S: ConfStore> ConfService<S> {
    /// Service for `path` backed by a caller-supplied store.
    #[must_use]
    pub fn with_store(path: impl Into<PathBuf>, store: S) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Path of the managed configuration file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install or replace the forwarding rule-set for `endpoint`.
    ///
    /// Any stale block for the identity is removed first; the fresh block
    /// lands at end-of-file, separated from existing content by one blank
    /// line. When the file already exists its pre-edit content is
    /// snapshotted to a backup file before anything else happens.
    ///
    /// # Errors
    ///
    /// [`ConfError::MissingDirectory`] when the containing directory is
    /// absent, [`ConfError::Read`] when the existing file cannot be loaded,
    /// [`ConfError::Backup`] when the snapshot cannot be written,
    /// [`ConfError::CorruptBlock`] when the endpoint's own block has a begin
    /// marker but no end marker, and [`ConfError::Write`] when persisting
    /// fails. A persist failure restores the pre-edit content; if that
    /// restore also fails the error escalates to
    /// [`ConfError::RestoreFailed`].
    pub fn install(
        &self,
        endpoint: Endpoint,
        transport: Transport,
        selectors: &[String],
    ) -> ConfResult<Outcome> {
        self.require_directory()?;
        let original = self.load()?;
        let backup = original
            .as_deref()
            .map(|content| self.take_backup(content))
            .transpose()?;

        let mut doc = Document::parse(original.as_deref().unwrap_or_default());
        let replaced = doc.remove_block(endpoint)?;
        doc.append_block(endpoint, transport, selectors);

        self.store.write(&self.path, &doc.render()).map_err(|err| {
            self.on_persist_failure(
                original.as_deref(),
                backup.as_deref(),
                err,
                MutationKind::Append,
            )
        })?;

        info!(
            endpoint = %endpoint,
            transport = %transport,
            replaced,
            path = %self.path.display(),
            "forwarding block installed"
        );
        Ok(Outcome::Changed { backup, replaced })
    }

    /// Remove the forwarding rule-set for `endpoint`.
    ///
    /// Absent file or absent block is a successful no-op with zero writes
    /// and zero backups. A removal that leaves the file empty deletes it.
    ///
    /// # Errors
    ///
    /// [`ConfError::Read`], [`ConfError::CorruptBlock`], and
    /// [`ConfError::Backup`] as for [`Self::install`];
    /// [`ConfError::BlockRemoval`] when persisting the removal fails, with
    /// the same restore discipline ([`ConfError::RestoreFailed`] when the
    /// restore fails too).
    pub fn uninstall(&self, endpoint: Endpoint) -> ConfResult<Outcome> {
        let Some(original) = self.load()? else {
            info!(
                endpoint = %endpoint,
                path = %self.path.display(),
                "configuration file absent; nothing to do"
            );
            return Ok(Outcome::Unchanged);
        };

        let mut doc = Document::parse(&original);
        if !doc.contains_block(endpoint)? {
            info!(
                endpoint = %endpoint,
                path = %self.path.display(),
                "no forwarding block installed; nothing to do"
            );
            return Ok(Outcome::Unchanged);
        }

        let backup = self.take_backup(&original)?;
        doc.remove_block(endpoint)?;

        if doc.is_empty() {
            // Nothing has been written yet, so a delete failure leaves the
            // file exactly as loaded; no restore pass is needed.
            self.store
                .remove(&self.path)
                .map_err(|err| ConfError::block_removal(&self.path, err))?;
            info!(path = %self.path.display(), "configuration file empty after removal; deleted");
        } else {
            self.store.write(&self.path, &doc.render()).map_err(|err| {
                self.on_persist_failure(
                    Some(&original),
                    Some(&backup),
                    err,
                    MutationKind::Removal,
                )
            })?;
        }

        info!(
            endpoint = %endpoint,
            path = %self.path.display(),
            backup = %backup.display(),
            "forwarding block removed"
        );
        Ok(Outcome::Changed {
            backup: Some(backup),
            replaced: true,
        })
    }

    /// Guarantee no block for `endpoint` remains, without the backup-file
    /// side effects of [`Self::uninstall`].
    ///
    /// The restore source on failure is the in-memory pre-call snapshot; an
    /// emptied file is left in place rather than deleted.
    ///
    /// # Errors
    ///
    /// [`ConfError::Read`], [`ConfError::CorruptBlock`], and
    /// [`ConfError::BlockRemoval`] (escalating to
    /// [`ConfError::RestoreFailed`] when the snapshot restore fails).
    pub fn ensure_absent(&self, endpoint: Endpoint) -> ConfResult<Outcome> {
        let Some(original) = self.load()? else {
            return Ok(Outcome::Unchanged);
        };

        let mut doc = Document::parse(&original);
        if !doc.remove_block(endpoint)? {
            return Ok(Outcome::Unchanged);
        }

        self.store.write(&self.path, &doc.render()).map_err(|err| {
            self.on_persist_failure(Some(&original), None, err, MutationKind::Removal)
        })?;

        info!(endpoint = %endpoint, path = %self.path.display(), "forwarding block removed");
        Ok(Outcome::Changed {
            backup: None,
            replaced: true,
        })
    }

    /// Scan the file for every installed forwarding block, in file order.
    ///
    /// # Errors
    ///
    /// [`ConfError::Read`] when the file cannot be loaded and
    /// [`ConfError::CorruptBlock`] when a begin marker has no end marker.
    pub fn installed(&self) -> ConfResult<Vec<InstalledBlock>> {
        self.load()?
            .map_or_else(|| Ok(Vec::new()), |content| Document::parse(&content).blocks())
    }

    fn require_directory(&self) -> ConfResult<()> {
        let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
            return Ok(());
        };
        if dir.is_dir() {
            Ok(())
        } else {
            Err(ConfError::MissingDirectory {
                path: dir.to_path_buf(),
            })
        }
    }

    fn load(&self) -> ConfResult<Option<String>> {
        self.store
            .read(&self.path)
            .map_err(|source| ConfError::read(&self.path, source))
    }

    /// Write the pre-edit content to a fresh, timestamp-named backup file.
    /// Same-second reruns get a numeric suffix; existing backups are never
    /// overwritten.
    fn take_backup(&self, content: &str) -> ConfResult<PathBuf> {
        let stamp = Local::now().format(BACKUP_STAMP_FORMAT).to_string();
        let mut attempt = 0;
        loop {
            let candidate = self.backup_candidate(&stamp, attempt);
            match self.store.write_new(&candidate, content) {
                Ok(()) => {
                    info!(backup = %candidate.display(), "backup snapshot written");
                    return Ok(candidate);
                }
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        && attempt < BACKUP_COLLISION_LIMIT =>
                {
                    attempt += 1;
                }
                Err(err) => return Err(ConfError::backup(candidate, err)),
            }
        }
    }

    fn backup_candidate(&self, stamp: &str, attempt: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".bak_{stamp}"));
        if attempt > 0 {
            name.push(format!("_{attempt}"));
        }
        PathBuf::from(name)
    }

    /// Put the pre-edit content back after a failed persist, then report the
    /// original failure. A failed restore escalates instead: the live file
    /// may no longer match any known-good state.
    fn on_persist_failure(
        &self,
        original: Option<&str>,
        backup: Option<&Path>,
        source: io::Error,
        kind: MutationKind,
    ) -> ConfError {
        warn!(
            error = %source,
            path = %self.path.display(),
            "persist failed; restoring pre-edit content"
        );
        if let Some(content) = original {
            if let Err(restore_err) = self.store.write(&self.path, content) {
                error!(
                    error = %restore_err,
                    path = %self.path.display(),
                    backup = ?backup,
                    "restore failed; configuration file may be inconsistent"
                );
                return ConfError::restore_failed(
                    &self.path,
                    backup.map(Path::to_path_buf),
                    restore_err,
                );
            }
            info!(path = %self.path.display(), "pre-edit content restored");
        }
        match kind {
            MutationKind::Append => ConfError::write(&self.path, source),
            MutationKind::Removal => ConfError::block_removal(&self.path, source),
        }
    }
}
