//! CLI error types and conversions

use crate::auth::AuthError;
use crate::exporter::ExportError;
use crate::fetcher::FetcherError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Export, authorization, or state error
    #[error(transparent)]
    Export(#[from] ExportError),

    /// No consumer key given
    #[error("no consumer key: pass --consumer-key or set POCKET_CONSUMER_KEY")]
    MissingConsumerKey,

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Export(e) if e.is_cancelled() => 130,
            CliError::MissingConsumerKey | CliError::InvalidArgument(_) => 2,
            CliError::Export(_) => 1,
        }
    }

    /// What the user can do about it
    pub fn remediation(&self) -> Option<String> {
        match self {
            CliError::Export(e) => e.remediation(),
            CliError::MissingConsumerKey => Some(
                "Create an application at https://getpocket.com/developer/apps/ to obtain a consumer key."
                    .to_string(),
            ),
            CliError::InvalidArgument(_) => None,
        }
    }
}

impl From<AuthError> for CliError {
    fn from(error: AuthError) -> Self {
        CliError::Export(ExportError::Authorization(error))
    }
}

impl From<ResumeError> for CliError {
    fn from(error: ResumeError) -> Self {
        CliError::Export(ExportError::Checkpoint(error))
    }
}

impl From<FetcherError> for CliError {
    fn from(error: FetcherError) -> Self {
        CliError::Export(ExportError::from(error))
    }
}
