//! Checkpoint persistence keyed by (fingerprint, mode)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::checkpoint::{Checkpoint, CHECKPOINT_SCHEMA_VERSION};
use super::state::{read_json, remove_state, write_json_atomic, ResumeError};
use crate::{ExportMode, Fingerprint};

/// Stores one checkpoint file per fingerprint and export mode
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store checkpoints under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding checkpoint files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for this fingerprint and mode
    pub fn path_for(&self, fingerprint: &Fingerprint, mode: ExportMode) -> PathBuf {
        self.dir
            .join(format!("checkpoint_{}_{}.json", fingerprint.as_str(), mode.as_str()))
    }

    /// Load a checkpoint, reporting why an existing file cannot be used
    ///
    /// # Errors
    /// `CorruptCheckpoint` for unparsable files, unknown schema versions, or a
    /// fingerprint/mode that does not match the request.
    pub fn try_load(
        &self,
        fingerprint: &Fingerprint,
        mode: ExportMode,
    ) -> Result<Option<Checkpoint>, ResumeError> {
        let path = self.path_for(fingerprint, mode);
        let Some(checkpoint) = read_json::<Checkpoint>(&path)? else {
            return Ok(None);
        };

        if checkpoint.schema_version() != CHECKPOINT_SCHEMA_VERSION {
            return Err(ResumeError::CorruptCheckpoint {
                path,
                reason: format!(
                    "schema version {} (expected {CHECKPOINT_SCHEMA_VERSION})",
                    checkpoint.schema_version()
                ),
            });
        }
        if !checkpoint.matches(fingerprint, mode) {
            return Err(ResumeError::CorruptCheckpoint {
                path,
                reason: format!(
                    "written for {} ({}), current run is {} ({})",
                    checkpoint.credential_fingerprint(),
                    checkpoint.export_mode(),
                    fingerprint,
                    mode
                ),
            });
        }
        Ok(Some(checkpoint))
    }

    /// Load a checkpoint usable by this run
    ///
    /// Missing, unreadable, or mismatched checkpoints all mean "start from zero"; the
    /// reason is logged.
    pub fn load(&self, fingerprint: &Fingerprint, mode: ExportMode) -> Option<Checkpoint> {
        match self.try_load(fingerprint, mode) {
            Ok(Some(checkpoint)) => {
                info!(
                    offset = checkpoint.offset(),
                    items_written = checkpoint.items_written(),
                    mode = %mode,
                    "Found checkpoint"
                );
                Some(checkpoint)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unusable checkpoint, export restarts from zero");
                None
            }
        }
    }

    /// Atomically write a checkpoint
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        let path = self.path_for(checkpoint.credential_fingerprint(), checkpoint.export_mode());
        write_json_atomic(&path, checkpoint)?;
        debug!(
            path = %path.display(),
            offset = checkpoint.offset(),
            items_written = checkpoint.items_written(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Delete the checkpoint; returns whether one existed
    pub fn clear(&self, fingerprint: &Fingerprint, mode: ExportMode) -> Result<bool, ResumeError> {
        let path = self.path_for(fingerprint, mode);
        let removed = remove_state(&path)?;
        if removed {
            debug!(path = %path.display(), "Checkpoint cleared");
        }
        Ok(removed)
    }
}
