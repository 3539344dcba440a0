//! Export command implementation

use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Cli, CliError};
use crate::auth::handshake::{ensure_credential, BrowserPrompt};
use crate::auth::Handshake;
use crate::exporter::config::REMOTE_MAX_BATCH_SIZE;
use crate::exporter::{
    ExportError, ExportExecutor, ExportJob, ExportSummary, RateLimiter, RetryExecutor,
    RetryPolicy,
};
use crate::fetcher::pocket_http::PocketHttpClient;
use crate::output::{default_output_path, OutputFormat};
use crate::shutdown::SharedShutdown;
use crate::ExportMode;

/// Export command arguments
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Output format: json or csv
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,

    /// Output file (default: pocket_export[_incremental]_YYYYmmdd_HHMMSS.<format>)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Only export items changed since the last successful export
    #[arg(long, default_value_t = false)]
    pub incremental: bool,

    /// Items per request (1-5000)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=REMOTE_MAX_BATCH_SIZE as i64))]
    pub batch_size: Option<u32>,

    /// Retries per request after the first attempt
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,
}

impl ExportArgs {
    /// Requested export mode
    pub fn mode(&self) -> ExportMode {
        if self.incremental {
            ExportMode::Incremental
        } else {
            ExportMode::Full
        }
    }

    /// Run the export, authorizing first if no credential is saved
    ///
    /// A credential the remote rejects mid-export is discarded and the handshake runs
    /// once more; the export then resumes from its checkpoint.
    pub async fn execute(
        &self,
        cli: &Cli,
        shutdown: SharedShutdown,
    ) -> Result<ExportSummary, CliError> {
        let mut config = cli.load_config()?;
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        config.validate()?;

        let consumer_key = cli.consumer_key()?;
        let fingerprint = cli.fingerprint()?;
        let layout = cli.state_layout();
        let client = Arc::new(PocketHttpClient::new(consumer_key, &config)?);
        let secrets = cli.secret_store();
        // One quota for the handshake and the fetch loop
        let limiter = RateLimiter::from_config(&config).map_err(ExportError::from)?;

        let retry = RetryExecutor::new(RetryPolicy::new(
            config.max_retries,
            config.base_delay(),
            config.max_delay(),
        ))
        .with_shutdown(shutdown.clone());
        let mut handshake = Handshake::new(&config, retry)?
            .with_shutdown(shutdown.clone())
            .with_limiter(limiter.clone());
        let prompt = BrowserPrompt;

        let mut credential =
            ensure_credential(&*secrets, &mut handshake, &*client, &prompt, &fingerprint)
                .await?;

        let mode = self.mode();
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(self.format, mode, Local::now()));
        let job = ExportJob::new(mode, self.format, output);

        let mut executor = ExportExecutor::new(Arc::clone(&client), config, layout.root())?
            .with_shutdown(shutdown.clone())
            .with_limiter(limiter);
        if !cli.quiet {
            executor = executor.with_progress(create_spinner(mode));
        }

        let mut reauthorized = false;
        loop {
            match executor.execute(&job, &credential).await {
                Ok(summary) => {
                    print_summary(&summary, mode);
                    return Ok(summary);
                }
                Err(e) if e.is_credential_rejected() && !reauthorized => {
                    warn!(error = %e, "Saved credential was rejected, authorizing again");
                    secrets.remove(&fingerprint)?;
                    credential = ensure_credential(
                        &*secrets,
                        &mut handshake,
                        &*client,
                        &prompt,
                        &fingerprint,
                    )
                    .await?;
                    reauthorized = true;
                    info!("Resuming export with the new credential");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn print_summary(summary: &ExportSummary, mode: ExportMode) {
    println!(
        "Exported {} items ({} export) to {}",
        summary.items_written,
        mode,
        summary.output_path.display()
    );
    if summary.resumed {
        println!(
            "  resumed from a checkpoint; {} items added in this run",
            summary.items_this_run
        );
    }
}

/// Spinner showing exported item counts
fn create_spinner(mode: ExportMode) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} items {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(format!("({mode} export)"));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
