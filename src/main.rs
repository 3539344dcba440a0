//! Main entry point for the pocket-export CLI

use anyhow::{anyhow, Context};
use clap::Parser;
use pocket_export::cli::{Cli, CliError};
use pocket_export::metrics::init_metrics;
use pocket_export::shutdown::{install_signal_handlers, ShutdownCoordinator};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Open `path` for appending behind a background writer
fn file_writer(path: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Initialize tracing subscriber with optional JSON formatting
///
/// `--log-level`/`--quiet` take precedence over `RUST_LOG`; `LOG_FORMAT=json` switches to
/// JSON lines. With `--log-file` the same events are also appended to that file; the returned
/// guard flushes it and must live until exit.
fn init_tracing(cli: &Cli) -> anyhow::Result<Option<WorkerGuard>> {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = if cli.log_level.is_some() || cli.quiet {
        EnvFilter::new(cli.log_filter())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()))
    };

    let stderr_layer = if json_format {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match &cli.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = if json_format {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(path) = &cli.log_file {
        info!(path = %path.display(), "Logging to file");
    }
    Ok(guard)
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr)
            .await
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
    }

    let shutdown = ShutdownCoordinator::shared();
    install_signal_handlers(shutdown.clone());

    cli.execute(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cli).await {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {e:#}");

        let cli_error = e.downcast_ref::<CliError>();
        if let Some(hint) = cli_error.and_then(CliError::remediation) {
            eprintln!("Hint: {hint}");
        }
        // exit() skips destructors, so flush the log file first
        drop(log_guard);
        std::process::exit(cli_error.map(CliError::exit_code).unwrap_or(1));
    }
}
