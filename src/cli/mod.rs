//! CLI command implementations

pub mod error;
pub mod export;
pub mod state;

pub use error::CliError;
pub use export::ExportArgs;
pub use state::{ResetArgs, ResetScope};

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::auth::{FallbackSecretStore, FileSecretStore, KeyringSecretStore, SecretStore};
use crate::exporter::config::DEFAULT_CONFIG_FILE;
use crate::exporter::ExportConfig;
use crate::resume::StateLayout;
use crate::shutdown::SharedShutdown;
use crate::Fingerprint;

/// Pocket library exporter
#[derive(Parser, Debug)]
#[command(name = "pocket-export")]
#[command(about = "Export a Pocket library to JSON or CSV with resume and incremental support", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Pocket application consumer key
    #[arg(long, global = true, env = "POCKET_CONSUMER_KEY", hide_env_values = true)]
    pub consumer_key: Option<String>,

    /// Configuration file (JSON)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Directory for checkpoints, credentials, and export metadata
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pocket_export=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Only log warnings and errors; no progress spinner
    #[arg(long, short, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Where the access token is kept
    #[arg(
        long,
        global = true,
        value_enum,
        env = "POCKET_CREDENTIAL_STORE",
        default_value_t = CredentialBackend::Auto
    )]
    pub credential_store: CredentialBackend,
}

/// Credential storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CredentialBackend {
    /// System keyring, encrypted file when the keyring is unavailable
    Auto,
    /// System keyring only
    Keyring,
    /// Encrypted file under the state directory
    File,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the library
    Export(ExportArgs),

    /// Show saved credential, checkpoints, and last successful export
    Status,

    /// Delete checkpoints so the next export starts from zero
    Reset(ResetArgs),

    /// Forget the saved access token
    Logout,
}

impl Cli {
    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        match &self.command {
            Commands::Export(args) => args.execute(self, shutdown).await.map(|_| ()),
            Commands::Status => state::status(self),
            Commands::Reset(args) => args.execute(self),
            Commands::Logout => state::logout(self),
        }
    }

    /// Consumer key from the flag or environment
    pub fn consumer_key(&self) -> Result<&str, CliError> {
        self.consumer_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(CliError::MissingConsumerKey)
    }

    /// Fingerprint of the consumer key
    pub fn fingerprint(&self) -> Result<Fingerprint, CliError> {
        Ok(Fingerprint::from_consumer_key(self.consumer_key()?))
    }

    /// State directory layout
    pub fn state_layout(&self) -> StateLayout {
        StateLayout::new(
            self.state_dir
                .clone()
                .unwrap_or_else(StateLayout::default_root),
        )
    }

    /// Credential store selected by `--credential-store`
    pub fn secret_store(&self) -> Box<dyn SecretStore> {
        let dir = self.state_layout().credentials();
        match self.credential_store {
            CredentialBackend::Auto => Box::new(FallbackSecretStore::system(dir)),
            CredentialBackend::Keyring => Box::new(KeyringSecretStore::default()),
            CredentialBackend::File => Box::new(FileSecretStore::new(dir)),
        }
    }

    /// Load the configuration file; a missing file yields defaults
    pub fn load_config(&self) -> Result<ExportConfig, CliError> {
        Ok(ExportConfig::from_file(Path::new(&self.config))?)
    }

    /// Default log filter for the binary
    pub fn log_filter(&self) -> String {
        match (&self.log_level, self.quiet) {
            (Some(level), _) if level.contains('=') => level.clone(),
            (Some(level), _) => format!("pocket_export={level}"),
            (None, true) => "pocket_export=warn".to_string(),
            (None, false) => "pocket_export=info".to_string(),
        }
    }
}
