//! `status`, `reset`, and `logout` commands

use chrono::{DateTime, Utc};
use clap::Parser;
use std::str::FromStr;
use tracing::{info, warn};

use super::{Cli, CliError};
use crate::output::partial_path;
use crate::ExportMode;

/// Which checkpoints `reset` deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// One mode
    Mode(ExportMode),
    /// Every mode
    All,
}

impl ResetScope {
    /// Modes covered by this scope
    pub fn modes(&self) -> Vec<ExportMode> {
        match self {
            ResetScope::Mode(mode) => vec![*mode],
            ResetScope::All => ExportMode::all().to_vec(),
        }
    }
}

impl FromStr for ResetScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(ResetScope::All),
            other => ExportMode::from_str(other)
                .map(ResetScope::Mode)
                .map_err(|_| format!("Invalid mode: {s}. Valid options: full, incremental, all")),
        }
    }
}

/// Reset command arguments
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Mode whose checkpoint is deleted: full, incremental, or all
    #[arg(long, default_value = "all")]
    pub mode: ResetScope,
}

impl ResetArgs {
    /// Delete checkpoints and the partial output files they point to
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let fingerprint = cli.fingerprint()?;
        let store = cli.state_layout().checkpoint_store();

        for mode in self.mode.modes() {
            if let Ok(Some(checkpoint)) = store.try_load(&fingerprint, mode) {
                if let Some(cursor) = checkpoint.output() {
                    let partial = partial_path(&cursor.path);
                    match std::fs::remove_file(&partial) {
                        Ok(()) => info!(path = %partial.display(), "Removed partial output"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!(path = %partial.display(), error = %e, "Failed to remove partial output"),
                    }
                }
            }

            if store.clear(&fingerprint, mode)? {
                println!("Removed {mode} checkpoint");
            } else {
                println!("No {mode} checkpoint");
            }
        }
        Ok(())
    }
}

/// Print saved credential, checkpoints, and last successful export
pub fn status(cli: &Cli) -> Result<(), CliError> {
    let fingerprint = cli.fingerprint()?;
    let layout = cli.state_layout();
    let secrets = cli.secret_store();
    let store = layout.checkpoint_store();
    let meta = layout.meta_store();

    println!("State directory: {}", layout.root().display());
    println!("Key fingerprint: {fingerprint}");

    match secrets.get(&fingerprint)? {
        Some(credential) => println!(
            "Credential:      saved ({})",
            credential.username().unwrap_or("unknown user")
        ),
        None => println!("Credential:      none (the next export opens the browser)"),
    }

    for mode in ExportMode::all() {
        match store.try_load(&fingerprint, mode) {
            Ok(Some(checkpoint)) => println!(
                "Checkpoint ({mode}): offset {}, {} items, saved {}",
                checkpoint.offset(),
                checkpoint.items_written(),
                format_timestamp(checkpoint.updated_at())
            ),
            Ok(None) => println!("Checkpoint ({mode}): none"),
            Err(e) => println!("Checkpoint ({mode}): unusable, will be ignored ({e})"),
        }
    }

    match meta.load(&fingerprint) {
        Some(last) => println!(
            "Last success:    {} ({} items)",
            format_timestamp(last.last_success_timestamp),
            last.items_exported
        ),
        None => println!("Last success:    never (incremental exports run in full)"),
    }
    Ok(())
}

/// Remove the saved credential
pub fn logout(cli: &Cli) -> Result<(), CliError> {
    let fingerprint = cli.fingerprint()?;
    let secrets = cli.secret_store();
    if secrets.remove(&fingerprint)? {
        println!("Saved credential removed");
    } else {
        println!("No saved credential");
    }
    Ok(())
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
