//! Atomic JSON persistence shared by the checkpoint and metadata stores
//!
//! Writes go to a temp file in the target directory, are fsynced, then renamed over the
//! target, all under an exclusive `fd-lock` on a sibling `.lock` file. Reads take the
//! shared lock, so a reader never observes a half-written file.

use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum allowed state file size (1 MB); anything larger is not ours
pub const MAX_STATE_FILE_SIZE: u64 = 1024 * 1024;

/// Errors related to persisted state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Missing fields, wrong schema, foreign fingerprint or mode, or unparsable content
    #[error("corrupt checkpoint {path}: {reason}")]
    CorruptCheckpoint {
        /// File that was rejected
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Another export for the same fingerprint and mode holds the lock
    #[error("another export is already running for {fingerprint} ({mode})")]
    ExportInProgress {
        /// Credential fingerprint
        fingerprint: String,
        /// Export mode
        mode: String,
    },
}

fn open_lock_file(path: &Path) -> Result<File, ResumeError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))
}

/// Serialize `value` and atomically replace `path` with it
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ResumeError> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

    let mut lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock
        .write()
        .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

    // Make the rename itself durable
    if let Ok(dir) = File::open(parent_dir) {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), "State written");
    Ok(())
}

/// Read and deserialize `path`; `Ok(None)` when it does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ResumeError> {
    if !path.exists() {
        return Ok(None);
    }

    let lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock
        .read()
        .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ResumeError::CorruptCheckpoint {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Remove `path` and its lock file; missing files are not an error
pub fn remove_state(path: &Path) -> Result<bool, ResumeError> {
    let removed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    let _ = std::fs::remove_file(path.with_extension("lock"));
    Ok(removed)
}
