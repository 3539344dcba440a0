//! Paginated fetch loop with checkpointing and resume
//!
//! One export run:
//!
//! 1. take the per-(fingerprint, mode) [`ExportLock`]
//! 2. load a usable checkpoint and reopen its output, or start a fresh output file
//! 3. let the [`DeltaSelector`] pick `since` and the start offset
//! 4. fetch batches until the remote runs out, each attempt gated by the rate limiter and
//!    driven by the retry executor, checkpointing every `checkpoint_interval` items
//! 5. on end of data close the output, clear the checkpoint and advance the marker; on
//!    any other exit flush, checkpoint, and return [`ExportError::Halted`]

use chrono::Utc;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::delta::{DeltaSelector, FetchPlan};
use super::{
    CheckpointDisposition, ExportConfig, ExportError, ExportJob, RateLimiter, RetryExecutor,
    RetryPolicy,
};
use crate::auth::Credential;
use crate::fetcher::{Batch, BatchRequest, ItemFetcher};
use crate::metrics::ExportMetrics;
use crate::output::{ItemWriter, OutputWriter, SinkWriter};
use crate::resume::{Checkpoint, CheckpointStore, ExportLock, StateLayout};
use crate::shutdown::SharedShutdown;
use crate::Fingerprint;

/// Result of a completed export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// File the items were written to
    pub output_path: PathBuf,
    /// Items in the output file, including ones written before a resume
    pub items_written: u64,
    /// Items written by this run
    pub items_this_run: u64,
    /// Raw records consumed from the remote, including unparsable ones
    pub final_offset: u64,
    /// Whether this run continued a checkpoint
    pub resumed: bool,
    /// `since` filter that was applied
    pub since: Option<i64>,
    /// Wall time of the run
    pub duration: Duration,
}

/// Progress of the current run
#[derive(Debug, Clone, Copy, Default)]
struct LoopState {
    offset: u64,
    items_written: u64,
    items_this_run: u64,
    since_flush: u64,
}

/// Runs export jobs for one credential fingerprint
pub struct ExportExecutor<F> {
    fetcher: F,
    config: ExportConfig,
    layout: StateLayout,
    limiter: RateLimiter,
    retry: RetryExecutor,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl<F: ItemFetcher> ExportExecutor<F> {
    /// Create an executor keeping its state under `state_dir`
    ///
    /// # Errors
    /// `Configuration` if the configuration does not validate.
    pub fn new(
        fetcher: F,
        config: ExportConfig,
        state_dir: impl Into<PathBuf>,
    ) -> Result<Self, ExportError> {
        config.validate()?;
        let limiter = RateLimiter::from_config(&config)?;
        let retry = RetryExecutor::new(RetryPolicy::new(
            config.max_retries,
            config.base_delay(),
            config.max_delay(),
        ));

        Ok(Self {
            fetcher,
            config,
            layout: StateLayout::new(state_dir),
            limiter,
            retry,
            shutdown: None,
            progress: None,
        })
    }

    /// Stop at the next batch boundary or sleep when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.limiter = self.limiter.with_shutdown(shutdown.clone());
        self.retry = self.retry.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        let mut retry = RetryExecutor::new(policy);
        if let Some(shutdown) = &self.shutdown {
            retry = retry.with_shutdown(shutdown.clone());
        }
        self.retry = retry;
        self
    }

    /// Replace the rate limiter, e.g. with a clone shared with the handshake
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = match &self.shutdown {
            Some(shutdown) => limiter.with_shutdown(shutdown.clone()),
            None => limiter,
        };
        self
    }

    /// Report exported item counts on a progress bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Rate limiter shared by every request of this executor
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// State directory layout
    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Configuration in effect
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run `job` with `credential`
    ///
    /// # Errors
    /// Failures before the first request surface directly; anything that stops the
    /// fetch loop is returned as [`ExportError::Halted`].
    pub async fn execute(
        &self,
        job: &ExportJob,
        credential: &Credential,
    ) -> Result<ExportSummary, ExportError> {
        let span = info_span!(
            "export",
            mode = %job.mode,
            format = %job.format,
            fingerprint = %credential.fingerprint()
        );
        self.run(job, credential).instrument(span).await
    }

    async fn run(
        &self,
        job: &ExportJob,
        credential: &Credential,
    ) -> Result<ExportSummary, ExportError> {
        job.validate().map_err(ExportError::Configuration)?;
        let started = Instant::now();
        let fingerprint = credential.fingerprint();
        let metrics = ExportMetrics::start(job.mode);

        let _lock = ExportLock::try_acquire(&self.layout.locks(), fingerprint, job.mode)?;
        let store = self.layout.checkpoint_store();
        let delta = DeltaSelector::new(self.layout.meta_store());

        let (checkpoint, mut sink) = self.open_sink(job, &store, fingerprint)?;
        let plan = delta.plan(
            fingerprint,
            job.mode,
            checkpoint.as_ref(),
            Utc::now().timestamp(),
        );
        info!(
            output = %sink.target().display(),
            offset = plan.start_offset,
            since = ?plan.since,
            resumed = plan.resumed,
            "Starting export"
        );

        let mut state = LoopState {
            offset: plan.start_offset,
            items_written: plan.items_already_written,
            ..LoopState::default()
        };

        if let Err(error) = self
            .fetch_loop(&plan, credential, &mut sink, &store, &mut state, &metrics)
            .await
        {
            metrics.record_failure(error.describe_kind());
            if let Some(progress) = &self.progress {
                progress.abandon_with_message(format!("halted at offset {}", state.offset));
            }
            let checkpoint = self.halt(&error, sink, &store, &plan, &state, fingerprint);
            return Err(ExportError::Halted {
                offset: state.offset,
                fingerprint: fingerprint.clone(),
                mode: job.mode,
                checkpoint,
                source: Box::new(error),
            });
        }

        let output_path = match sink.close() {
            Ok(path) => path,
            Err(e) => {
                metrics.record_failure("output");
                return Err(e.into());
            }
        };
        store.clear(fingerprint, job.mode)?;
        delta.commit(fingerprint, &plan, state.items_written)?;
        metrics.record_success(state.items_written);
        if let Some(progress) = &self.progress {
            progress.finish_with_message(format!("{} items exported", state.items_written));
        }

        Ok(ExportSummary {
            output_path,
            items_written: state.items_written,
            items_this_run: state.items_this_run,
            final_offset: state.offset,
            resumed: plan.resumed,
            since: plan.since,
            duration: started.elapsed(),
        })
    }

    /// Reopen the output of a usable checkpoint, or create a fresh one
    fn open_sink(
        &self,
        job: &ExportJob,
        store: &CheckpointStore,
        fingerprint: &Fingerprint,
    ) -> Result<(Option<Checkpoint>, SinkWriter), ExportError> {
        if let Some(checkpoint) = store.load(fingerprint, job.mode) {
            match checkpoint.output() {
                Some(cursor) if cursor.format == job.format => match SinkWriter::resume(cursor) {
                    Ok(sink) => {
                        if cursor.path != job.output_path {
                            info!(
                                path = %cursor.path.display(),
                                "Continuing the output file of the interrupted run"
                            );
                        }
                        return Ok((Some(checkpoint), sink));
                    }
                    Err(e) => {
                        warn!(error = %e, "Cannot continue interrupted output, export restarts from zero")
                    }
                },
                Some(cursor) => warn!(
                    checkpoint_format = %cursor.format,
                    requested_format = %job.format,
                    "Checkpoint belongs to an export in another format, export restarts from zero"
                ),
                None => warn!("Checkpoint has no output position, export restarts from zero"),
            }
            store.clear(fingerprint, job.mode)?;
        }

        let sink = SinkWriter::create(&job.output_path, job.format, job.mode)?;
        Ok((None, sink))
    }

    async fn fetch_loop(
        &self,
        plan: &FetchPlan,
        credential: &Credential,
        sink: &mut SinkWriter,
        store: &CheckpointStore,
        state: &mut LoopState,
        metrics: &ExportMetrics,
    ) -> Result<(), ExportError> {
        let batch_size = self.config.batch_size;

        loop {
            if self.shutdown_requested() {
                info!(offset = state.offset, "Shutdown requested, stopping at batch boundary");
                return Err(ExportError::Cancelled);
            }

            let request = BatchRequest {
                offset: state.offset,
                count: batch_size,
                since: plan.since,
            };
            let batch = self.fetch_batch(credential, &request).await?;

            if batch.skipped() > 0 {
                warn!(
                    offset = state.offset,
                    skipped = batch.skipped(),
                    "Skipped records that could not be parsed"
                );
            }
            sink.write_items(&batch.items)?;

            let written = batch.items.len() as u64;
            state.items_written += written;
            state.items_this_run += written;
            state.since_flush += written;
            state.offset += batch.received as u64;
            metrics.record_items(written);

            debug!(
                offset = state.offset,
                received = batch.received,
                items_written = state.items_written,
                "Batch exported"
            );
            if let Some(progress) = &self.progress {
                progress.set_position(state.items_written);
                progress.set_message(format!("offset {}", state.offset));
            }

            if batch.end_of_data || batch.received < batch_size as usize {
                info!(
                    offset = state.offset,
                    items_written = state.items_written,
                    "Reached end of data"
                );
                return Ok(());
            }

            if state.since_flush >= self.config.checkpoint_interval {
                self.save_checkpoint(sink, store, plan, state, credential.fingerprint())?;
                state.since_flush = 0;
            }
        }
    }

    /// One batch, each attempt gated by the limiter and reported back to its pacing
    async fn fetch_batch(
        &self,
        credential: &Credential,
        request: &BatchRequest,
    ) -> Result<Batch, ExportError> {
        let fetcher = &self.fetcher;
        let limiter = &self.limiter;

        self.retry
            .execute("fetch batch", |attempt| async move {
                if attempt > 0 {
                    debug!(attempt, offset = request.offset, "Retrying batch");
                }
                limiter.acquire().await?;
                let result = fetcher.fetch_batch(credential, request).await;
                match &result {
                    Ok(_) => limiter.record_success(),
                    Err(_) => limiter.record_failure(),
                }
                result.map_err(ExportError::from)
            })
            .await
            .map_err(ExportError::from)
    }

    /// Flush the sink, then record the batch boundary
    fn save_checkpoint(
        &self,
        sink: &mut SinkWriter,
        store: &CheckpointStore,
        plan: &FetchPlan,
        state: &LoopState,
        fingerprint: &Fingerprint,
    ) -> Result<(), ExportError> {
        sink.flush()?;
        let checkpoint = Checkpoint::new(
            fingerprint.clone(),
            plan.mode,
            state.offset,
            state.items_written,
            plan.since,
        )
        .with_output(sink.cursor());
        store.save(&checkpoint)?;
        Ok(())
    }

    /// Suspend the sink and keep a checkpoint where possible
    fn halt(
        &self,
        error: &ExportError,
        mut sink: SinkWriter,
        store: &CheckpointStore,
        plan: &FetchPlan,
        state: &LoopState,
        fingerprint: &Fingerprint,
    ) -> CheckpointDisposition {
        // After a write failure the sink may hold half a batch; keep the last checkpoint
        let at_boundary = !matches!(error, ExportError::Output(_));

        if at_boundary && state.offset > 0 {
            match self.save_checkpoint(&mut sink, store, plan, state, fingerprint) {
                Ok(()) => info!(
                    offset = state.offset,
                    items_written = state.items_written,
                    "Progress saved"
                ),
                Err(e) => warn!(error = %e, "Failed to save checkpoint on halt"),
            }
        }

        if let Err(e) = sink.suspend() {
            warn!(error = %e, "Failed to flush output on halt");
        }

        match store.try_load(fingerprint, plan.mode) {
            Ok(Some(_)) => CheckpointDisposition::Preserved,
            _ => CheckpointDisposition::Absent,
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
