//! Advisory lock serializing exports per fingerprint and mode
//!
//! Two exports writing the same checkpoint file would interleave unpredictably, so the
//! second one is refused up front.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::state::ResumeError;
use crate::{ExportMode, Fingerprint};

/// Held for the duration of an export; released on drop
pub struct ExportLock {
    // The write guard is forgotten after acquisition; the OS lock lives as long as the
    // file handle and is released when it closes.
    _lock: RwLock<File>,
    path: PathBuf,
}

impl std::fmt::Debug for ExportLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportLock").field("path", &self.path).finish()
    }
}

impl ExportLock {
    /// Path of the lock file for this fingerprint and mode
    pub fn path_for(dir: &Path, fingerprint: &Fingerprint, mode: ExportMode) -> PathBuf {
        dir.join(format!("export_{}_{}.lock", fingerprint.as_str(), mode.as_str()))
    }

    /// Try to take the lock without blocking
    ///
    /// # Errors
    /// `ExportInProgress` if another process (or another handle in this process) holds it.
    pub fn try_acquire(
        dir: &Path,
        fingerprint: &Fingerprint,
        mode: ExportMode,
    ) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(dir).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let path = Self::path_for(dir, fingerprint, mode);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ResumeError::ExportInProgress {
                    fingerprint: fingerprint.to_string(),
                    mode: mode.to_string(),
                })
            }
            Err(e) => {
                return Err(ResumeError::LockError(format!(
                    "Failed to acquire lock: {e}"
                )))
            }
        }

        debug!(path = %path.display(), "Export lock acquired");
        Ok(Self { _lock: lock, path })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
