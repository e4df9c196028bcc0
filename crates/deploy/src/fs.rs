//! File system utils.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

use fs2::FileExt;

use crate::error::{DeployError, Result};

pub struct FsHandler;

/// Exclusive advisory lock on a file, released on drop.
pub struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(err = %e, "Failed to release ledger lock");
        }
    }
}

impl FsHandler {
    /// Create a directory and its parents if they don't exist.
    pub fn ensure_dir(path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| DeployError::storage(&format!("Failed to create {}", path.display()), e))
    }

    /// Read a file, returning `None` when it does not exist.
    pub fn read_optional(path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::storage(
                &format!("Failed to read {}", path.display()),
                e,
            )),
        }
    }

    /// Replace `path` with `content` without ever exposing a partial file.
    ///
    /// The content is written and synced to a sibling temp file which is then renamed
    /// over the target.
    pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)
        };

        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            DeployError::storage(&format!("Failed to write {}", path.display()), e)
        })
    }

    /// Remove a file if it exists.
    pub fn remove_optional(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::storage(
                &format!("Failed to remove {}", path.display()),
                e,
            )),
        }
    }

    /// Block until an exclusive lock on `path` is held. The lock file is created if needed.
    pub fn lock_exclusive(path: &Path) -> Result<FileLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| DeployError::storage(&format!("Failed to open {}", path.display()), e))?;

        file.lock_exclusive()
            .map_err(|e| DeployError::storage(&format!("Failed to lock {}", path.display()), e))?;

        tracing::trace!(path = %path.display(), "Acquired ledger lock");

        Ok(FileLock { file })
    }
}
