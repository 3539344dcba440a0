//! Remote API access
//!
//! [`ItemFetcher`] is the seam between the fetch loop and the remote service: one call,
//! one page. [`pocket_http::PocketHttpClient`] implements it over HTTP; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use std::time::Duration;

use crate::auth::Credential;
use crate::Item;

pub mod pocket_http;
pub mod pocket_parser;

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetcherError {
    /// Request timed out
    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    /// Connection refused, DNS failure, or another transport problem
    #[error("network error: {0}")]
    NetworkError(String),

    /// The remote side throttled the request (HTTP 429 or per-user limit)
    #[error("rate limited by remote: {message}")]
    RateLimited {
        /// Delay the remote asked for, if any
        retry_after: Option<Duration>,
        /// Remote error detail
        message: String,
    },

    /// HTTP 5xx
    #[error("server error (HTTP {status}): {message}")]
    ServerError {
        /// HTTP status
        status: u16,
        /// Delay the remote asked for, if any
        retry_after: Option<Duration>,
        /// Remote error detail
        message: String,
    },

    /// The access token was rejected (HTTP 401)
    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    /// The application's daily quota on the remote side is spent
    #[error("remote application quota exhausted: {0}")]
    QuotaExhausted(String),

    /// HTTP 403 for any other reason
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Any other HTTP 4xx
    #[error("client error (HTTP {status}): {message}")]
    ClientError {
        /// HTTP status
        status: u16,
        /// Remote error detail
        message: String,
    },

    /// The response body could not be read
    #[error("failed to read response body: {0}")]
    BodyError(String),

    /// The response body is not what the API documents
    #[error("parse error: {0}")]
    ParseError(String),
}

impl FetcherError {
    /// User-friendly description used inside retry log messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout(_) => "network timeout",
            Self::NetworkError(_) => "connection failed",
            Self::RateLimited { .. } => "rate limit exceeded",
            Self::ServerError { status, .. } => match status {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::CredentialRejected(_) => "authentication failed (401)",
            Self::QuotaExhausted(_) => "application quota exhausted",
            Self::Forbidden(_) => "access denied (403)",
            Self::ClientError { .. } => "invalid request",
            Self::BodyError(_) => "truncated response",
            Self::ParseError(_) => "malformed response",
        }
    }

    /// Suggested remediation shown after a fatal failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout(_) | Self::NetworkError(_) | Self::BodyError(_) => {
                "Check your network connection and try again"
            }
            Self::RateLimited { .. } | Self::QuotaExhausted(_) => {
                "Wait for the remote quota to reset, then re-run to resume"
            }
            Self::ServerError { .. } => "The service may be experiencing issues, try again later",
            Self::CredentialRejected(_) => "Run `pocket-export logout` and authorize again",
            Self::Forbidden(_) => "Verify the consumer key has retrieve permission",
            Self::ClientError { .. } | Self::ParseError(_) => {
                "Re-run with --log-level debug and report the response"
            }
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    /// Items to skip
    pub offset: u64,
    /// Items requested
    pub count: u32,
    /// Only items modified at or after this unix timestamp
    pub since: Option<i64>,
}

/// One page of results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Items that parsed successfully, in a deterministic order
    pub items: Vec<Item>,
    /// Raw records the remote returned, including ones that failed to parse
    pub received: usize,
    /// The remote signalled that no further results exist
    pub end_of_data: bool,
}

impl Batch {
    /// Records that were returned but could not be parsed
    pub fn skipped(&self) -> usize {
        self.received.saturating_sub(self.items.len())
    }
}

/// Source of item pages
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Fetch exactly one page
    ///
    /// # Errors
    /// Returns a [`FetcherError`] the retry executor classifies.
    async fn fetch_batch(
        &self,
        credential: &Credential,
        request: &BatchRequest,
    ) -> FetcherResult<Batch>;
}

#[async_trait]
impl<T: ItemFetcher + ?Sized> ItemFetcher for std::sync::Arc<T> {
    async fn fetch_batch(
        &self,
        credential: &Credential,
        request: &BatchRequest,
    ) -> FetcherResult<Batch> {
        (**self).fetch_batch(credential, request).await
    }
}
