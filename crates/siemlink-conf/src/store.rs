//! Filesystem access seam for the configuration service.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(unix)]
const CONFIG_FILE_MODE: u32 = 0o644;

/// Raw file access used by [`crate::ConfService`].
///
/// The production implementation talks to the local filesystem; tests inject
/// failing wrappers to drive the restore path.
pub trait ConfStore {
    /// Load the full content of `path`, or `None` when the file is absent.
    ///
    /// # Errors
    ///
    /// Any IO failure other than the file being absent.
    fn read(&self, path: &Path) -> io::Result<Option<String>>;

    /// Replace `path` with `content` atomically.
    ///
    /// # Errors
    ///
    /// Any IO failure while staging or renaming the replacement.
    fn write(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Create `path` with `content`, failing if it already exists.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::AlreadyExists`] when `path` is taken, or any other
    /// IO failure while creating the file.
    fn write_new(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Remove the file at `path`.
    ///
    /// # Errors
    ///
    /// Any IO failure while unlinking, including the file being absent.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`ConfStore`] backed by the local filesystem.
///
/// Writes land in a temporary file beside the destination and are renamed
/// into place, so a failed write never leaves a torn configuration file. The
/// temporary file is cleaned up on every exit path by its guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStore;

impl ConfStore for DiskStore {
    fn read(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| io::Error::other("configuration path has no parent directory"))?;
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(content.as_bytes())?;
        #[cfg(unix)]
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(CONFIG_FILE_MODE))?;
        staged.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    fn write_new(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(content.as_bytes())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
