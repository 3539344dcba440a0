//! Checkpoint records
//!
//! A checkpoint marks the batch boundary up to which items were flushed to the sink. It is
//! only valid for the fingerprint and mode that wrote it.

use serde::{Deserialize, Serialize};

use crate::output::OutputCursor;
use crate::{ExportMode, Fingerprint};

/// Current checkpoint schema version
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Durable progress marker of an export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: u32,
    offset: u64,
    items_written: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<i64>,
    export_mode: ExportMode,
    credential_fingerprint: Fingerprint,
    updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<OutputCursor>,
}

impl Checkpoint {
    /// Create a checkpoint at `offset` with `items_written` items flushed so far
    pub fn new(
        fingerprint: Fingerprint,
        mode: ExportMode,
        offset: u64,
        items_written: u64,
        since: Option<i64>,
    ) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            offset,
            items_written,
            since,
            export_mode: mode,
            credential_fingerprint: fingerprint,
            updated_at: chrono::Utc::now().timestamp(),
            output: None,
        }
    }

    /// Attach the sink position covered by this checkpoint
    pub fn with_output(mut self, cursor: OutputCursor) -> Self {
        self.output = Some(cursor);
        self
    }

    /// Schema version the checkpoint was written with
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Remote offset of the next batch
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Items flushed to the sink before this checkpoint
    pub fn items_written(&self) -> u64 {
        self.items_written
    }

    /// `since` filter of the run that wrote the checkpoint
    pub fn since(&self) -> Option<i64> {
        self.since
    }

    /// Export mode
    pub fn export_mode(&self) -> ExportMode {
        self.export_mode
    }

    /// Credential fingerprint
    pub fn credential_fingerprint(&self) -> &Fingerprint {
        &self.credential_fingerprint
    }

    /// Unix seconds of the last write
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Sink position to continue from, if the run wrote to a file
    pub fn output(&self) -> Option<&OutputCursor> {
        self.output.as_ref()
    }

    /// Whether the checkpoint may be used by a run with this fingerprint and mode
    pub fn matches(&self, fingerprint: &Fingerprint, mode: ExportMode) -> bool {
        self.schema_version == CHECKPOINT_SCHEMA_VERSION
            && &self.credential_fingerprint == fingerprint
            && self.export_mode == mode
    }
}
