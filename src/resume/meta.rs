//! "Last successful export" marker per fingerprint

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::state::{read_json, remove_state, write_json_atomic, ResumeError};
use crate::{ExportMode, Fingerprint};

/// Record of the last export that ran to natural end-of-data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMeta {
    /// Unix seconds at which that export started
    pub last_success_timestamp: i64,
    /// Mode of that export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<ExportMode>,
    /// Items it wrote
    #[serde(default)]
    pub items_exported: u64,
}

/// Stores one [`ExportMeta`] file per fingerprint
#[derive(Debug, Clone)]
pub struct MetaStore {
    dir: PathBuf,
}

impl MetaStore {
    /// Store metadata under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding metadata files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the metadata file for `fingerprint`
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir
            .join(format!("export_meta_{}.json", fingerprint.as_str()))
    }

    /// Load the marker; unreadable files count as absent
    pub fn load(&self, fingerprint: &Fingerprint) -> Option<ExportMeta> {
        let path = self.path_for(fingerprint);
        match read_json::<ExportMeta>(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable export metadata");
                None
            }
        }
    }

    /// Atomically write the marker
    pub fn save(&self, fingerprint: &Fingerprint, meta: &ExportMeta) -> Result<(), ResumeError> {
        let path = self.path_for(fingerprint);
        write_json_atomic(&path, meta)?;
        info!(
            fingerprint = %fingerprint,
            last_success_timestamp = meta.last_success_timestamp,
            "Recorded last successful export"
        );
        Ok(())
    }

    /// Delete the marker; returns whether one existed
    pub fn clear(&self, fingerprint: &Fingerprint) -> Result<bool, ResumeError> {
        remove_state(&self.path_for(fingerprint))
    }
}
