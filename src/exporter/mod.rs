//! Export orchestration
//!
//! The exporter ties the sync engine together:
//!
//! 1. **Job**: what to export and where, see [`job::ExportJob`]
//! 2. **Delta selection**: [`delta::DeltaSelector`] picks the `since` filter and start offset
//! 3. **Fetch loop**: [`executor::ExportExecutor`] pages through the remote library, each
//!    request gated by [`rate_limit::RateLimiter`] and wrapped by [`retry::RetryExecutor`]
//! 4. **Checkpoints**: progress is flushed and recorded every `checkpoint_interval` items
//!    and on every halt, so a later run resumes instead of starting over
//!
//! # Quick Start
//!
//! ```no_run
//! use pocket_export::exporter::{ExportConfig, ExportExecutor, ExportJob};
//! use pocket_export::fetcher::pocket_http::PocketHttpClient;
//! use pocket_export::output::OutputFormat;
//! use pocket_export::auth::Credential;
//! use pocket_export::{ExportMode, Fingerprint};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExportConfig::default();
//! let client = PocketHttpClient::new("consumer-key", &config)?;
//! let credential = Credential::new(
//!     "access-token",
//!     None,
//!     Fingerprint::from_consumer_key("consumer-key"),
//! );
//!
//! let job = ExportJob::new(ExportMode::Incremental, OutputFormat::Csv, "./pocket.csv".into());
//! let executor = ExportExecutor::new(client, config, "./state")?;
//! let summary = executor.execute(&job, &credential).await?;
//! println!("{} items", summary.items_written);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Failures before the loop starts (configuration, locking, opening the sink) surface
//! directly. Anything that stops the loop is wrapped in [`ExportError::Halted`], which
//! records where the loop stopped and whether a checkpoint was kept.

pub mod config;
pub mod delta;
pub mod executor;
pub mod job;
pub mod rate_limit;
pub mod retry;
pub mod retry_formatter;

pub use config::ExportConfig;
pub use delta::{DeltaSelector, FetchPlan};
pub use executor::{ExportExecutor, ExportSummary};
pub use job::ExportJob;
pub use rate_limit::{RateLimitError, RateLimiter, RateWindow, WindowKind};
pub use retry::{classify, Classify, RetryClass, RetryError, RetryExecutor, RetryPolicy};

use std::fmt;

use crate::auth::AuthError;
use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::{ExportMode, Fingerprint};

/// Whether a halted export left a checkpoint behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDisposition {
    /// A checkpoint exists; re-running resumes from it
    Preserved,
    /// No progress was recorded; re-running starts from zero
    Absent,
}

impl fmt::Display for CheckpointDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointDisposition::Preserved => f.write_str("preserved"),
            CheckpointDisposition::Absent => f.write_str("none"),
        }
    }
}

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The handshake did not produce a credential
    #[error("authorization failed: {0}")]
    Authorization(#[from] AuthError),

    /// Local quota would require waiting longer than allowed
    #[error("{0}")]
    QuotaExceeded(RateLimitError),

    /// Every allowed attempt of a request failed
    #[error("request failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: FetcherError,
    },

    /// The remote service rejected a request for good
    #[error("request rejected: {0}")]
    Request(FetcherError),

    /// The access token is no longer accepted
    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    /// Checkpoint, metadata, or lock failure
    #[error("state error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// Writing the export file failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Shutdown was requested
    #[error("export cancelled")]
    Cancelled,

    /// The fetch loop stopped before end of data
    #[error("{mode} export halted at offset {offset} (checkpoint {checkpoint}): {source}")]
    Halted {
        /// Offset of the next batch that was not exported
        offset: u64,
        /// Credential fingerprint of the run
        fingerprint: Fingerprint,
        /// Export mode of the run
        mode: ExportMode,
        /// Whether a checkpoint was kept
        checkpoint: CheckpointDisposition,
        /// Why the loop stopped
        #[source]
        source: Box<ExportError>,
    },
}

impl ExportError {
    /// The innermost cause, looking through [`ExportError::Halted`]
    pub fn root(&self) -> &ExportError {
        match self {
            ExportError::Halted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the remote service rejected the credential
    pub fn is_credential_rejected(&self) -> bool {
        matches!(
            self.root(),
            ExportError::CredentialRejected(_)
                | ExportError::Request(FetcherError::CredentialRejected(_))
        )
    }

    /// Whether the export stopped because of a shutdown request
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.root(),
            ExportError::Cancelled | ExportError::Authorization(AuthError::Cancelled)
        )
    }

    /// Short label used for failure metrics
    pub(crate) fn describe_kind(&self) -> &'static str {
        match self.root() {
            ExportError::Configuration(_) => "configuration",
            ExportError::Authorization(_) => "authorization",
            ExportError::QuotaExceeded(_) => "quota_exceeded",
            ExportError::RetryExhausted { .. } => "retry_exhausted",
            ExportError::Request(_) => "request",
            ExportError::CredentialRejected(_) => "credential_rejected",
            ExportError::Checkpoint(_) => "checkpoint",
            ExportError::Output(_) => "output",
            ExportError::Cancelled => "cancelled",
            ExportError::Halted { .. } => "halted",
        }
    }

    /// What the user can do about it
    pub fn remediation(&self) -> Option<String> {
        let resume_hint = match self {
            ExportError::Halted {
                checkpoint: CheckpointDisposition::Preserved,
                ..
            } => " Progress was saved; re-run the same command to resume.",
            _ => "",
        };

        let hint = match self.root() {
            ExportError::Configuration(_) => "Check the configuration file and command-line flags.",
            ExportError::Authorization(AuthError::TimedOut { .. }) => {
                "Approve the request in the browser before the timeout, or raise oauth_timeout."
            }
            ExportError::Authorization(AuthError::Denied { .. }) => {
                "Authorization was denied in the browser; run the export again and approve it."
            }
            ExportError::Authorization(AuthError::Listener { .. }) => {
                "Free the callback port or set callback_addr to another loopback address."
            }
            ExportError::Authorization(AuthError::QuotaExceeded(_)) => {
                "The local request quota is used up; try again later."
            }
            ExportError::Authorization(_) => "Verify the consumer key and try again.",
            ExportError::QuotaExceeded(_) => "The local request quota is used up; try again later.",
            ExportError::RetryExhausted { last_error, .. } => last_error.suggestion(),
            ExportError::Request(error) => error.suggestion(),
            ExportError::CredentialRejected(_) => {
                "The stored access token was revoked; authorize again."
            }
            ExportError::Checkpoint(ResumeError::ExportInProgress { .. }) => {
                "Another export with the same key and mode is running; wait for it to finish."
            }
            ExportError::Checkpoint(_) => "Check permissions on the state directory.",
            ExportError::Output(_) => "Check free space and permissions of the output location.",
            ExportError::Cancelled => "",
            ExportError::Halted { .. } => "",
        };

        let text = format!("{hint}{resume_hint}");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl From<RateLimitError> for ExportError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Cancelled => ExportError::Cancelled,
            RateLimitError::ConfigurationError(message) => ExportError::Configuration(message),
            quota @ RateLimitError::QuotaExceeded { .. } => ExportError::QuotaExceeded(quota),
        }
    }
}

impl From<FetcherError> for ExportError {
    fn from(error: FetcherError) -> Self {
        match error {
            FetcherError::CredentialRejected(message) => ExportError::CredentialRejected(message),
            other => ExportError::Request(other),
        }
    }
}

impl From<RetryError<ExportError>> for ExportError {
    fn from(error: RetryError<ExportError>) -> Self {
        match error {
            RetryError::Fatal(error) => error,
            RetryError::Exhausted {
                attempts,
                last_error: ExportError::Request(last_error),
            } => ExportError::RetryExhausted {
                attempts,
                last_error,
            },
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Cancelled => ExportError::Cancelled,
        }
    }
}

impl Classify for ExportError {
    fn classify(&self) -> RetryClass {
        match self {
            ExportError::Request(error) => classify(error),
            _ => RetryClass::Fatal,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ExportError::Request(error) => error.description(),
            ExportError::QuotaExceeded(_) => "local quota exhausted",
            _ => "export failed",
        }
    }
}
