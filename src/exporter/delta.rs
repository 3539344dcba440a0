//! Incremental delta selection
//!
//! Decides where a run starts: a full export reads everything, an incremental export
//! reads items changed since the last run that completed, and a usable checkpoint
//! overrides both so a resumed run continues the query of the run it resumes.

use tracing::{info, warn};

use crate::resume::{Checkpoint, ExportMeta, MetaStore, ResumeError};
use crate::{ExportMode, Fingerprint};

/// Where and how the fetch loop starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Requested mode
    pub mode: ExportMode,
    /// Only items modified since this unix timestamp
    pub since: Option<i64>,
    /// Offset of the first batch
    pub start_offset: u64,
    /// Items already in the output from earlier runs
    pub items_already_written: u64,
    /// Whether the plan continues a checkpoint
    pub resumed: bool,
    /// Unix seconds at which this run started
    pub run_started_at: i64,
}

/// Computes fetch plans and advances the "last successful export" marker
#[derive(Debug, Clone)]
pub struct DeltaSelector {
    meta: MetaStore,
}

impl DeltaSelector {
    /// Create a selector backed by `meta`
    pub fn new(meta: MetaStore) -> Self {
        Self { meta }
    }

    /// Plan a run
    ///
    /// `checkpoint` must already be validated for this fingerprint and mode.
    pub fn plan(
        &self,
        fingerprint: &Fingerprint,
        mode: ExportMode,
        checkpoint: Option<&Checkpoint>,
        run_started_at: i64,
    ) -> FetchPlan {
        if let Some(checkpoint) = checkpoint {
            info!(
                offset = checkpoint.offset(),
                since = ?checkpoint.since(),
                "Resuming from checkpoint"
            );
            return FetchPlan {
                mode,
                since: checkpoint.since(),
                start_offset: checkpoint.offset(),
                items_already_written: checkpoint.items_written(),
                resumed: true,
                run_started_at,
            };
        }

        let since = match mode {
            ExportMode::Full => None,
            ExportMode::Incremental => match self.meta.load(fingerprint) {
                Some(meta) => {
                    info!(since = meta.last_success_timestamp, "Incremental export");
                    Some(meta.last_success_timestamp)
                }
                None => {
                    warn!("No previous successful export recorded, running a full export");
                    None
                }
            },
        };

        FetchPlan {
            mode,
            since,
            start_offset: 0,
            items_already_written: 0,
            resumed: false,
            run_started_at,
        }
    }

    /// Record a completed run
    ///
    /// Resumed runs leave the marker alone: their items predate the checkpoint they
    /// continued, so the marker keeps pointing at the start of the last run that read
    /// the library from the beginning. Returns whether the marker moved.
    pub fn commit(
        &self,
        fingerprint: &Fingerprint,
        plan: &FetchPlan,
        items_exported: u64,
    ) -> Result<bool, ResumeError> {
        if plan.resumed {
            info!("Resumed run completed; last successful export marker unchanged");
            return Ok(false);
        }
        let meta = ExportMeta {
            last_success_timestamp: plan.run_started_at,
            last_mode: Some(plan.mode),
            items_exported,
        };
        self.meta.save(fingerprint, &meta)?;
        Ok(true)
    }

    /// Last recorded successful export
    pub fn last_success(&self, fingerprint: &Fingerprint) -> Option<ExportMeta> {
        self.meta.load(fingerprint)
    }
}
