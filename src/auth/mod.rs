//! Authorization handshake and credential storage
//!
//! A [`Credential`] is obtained once through the browser consent flow in [`handshake`] and
//! kept in a [`token_store::SecretStore`] until the remote rejects it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::exporter::rate_limit::RateLimitError;
use crate::exporter::retry::{classify, Classify, RetryClass};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::Fingerprint;

pub mod handshake;
pub mod token_store;

pub use handshake::{CallbackListener, CallbackOutcome, ConsentPrompt, Handshake, HandshakeState};
pub use token_store::{
    FallbackSecretStore, FileSecretStore, KeyringSecretStore, MemorySecretStore, SecretStore,
};

/// Authorization errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The user did not approve access before the timeout
    #[error("authorization timed out after {}s without a callback; re-run and approve access in the browser", .timeout.as_secs())]
    TimedOut {
        /// Configured wait
        timeout: Duration,
    },

    /// The user declined access on the consent page
    #[error("authorization denied{}; re-run and choose Authorize on the consent page", fmt_reason(.reason))]
    Denied {
        /// Reason reported by the callback, if any
        reason: Option<String>,
    },

    /// The callback listener could not be bound or served
    #[error("callback listener error on {addr}: {message}; free the port or set callback_addr in the config file")]
    Listener {
        /// Address the listener was bound to
        addr: String,
        /// Underlying error
        message: String,
    },

    /// A token request was rejected
    #[error("authorization request failed: {0}")]
    Remote(#[from] FetcherError),

    /// A token request kept failing transiently
    #[error("authorization request failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: FetcherError,
    },

    /// Local quota would require waiting longer than allowed
    #[error("authorization request blocked: {0}")]
    QuotaExceeded(RateLimitError),

    /// Shutdown was requested during the handshake
    #[error("authorization cancelled by shutdown")]
    Cancelled,

    /// Callback address or consent URL is unusable
    #[error("authorization misconfigured: {0}")]
    Configuration(String),

    /// The secret store failed
    #[error("credential storage error: {0}")]
    Storage(String),
}

fn fmt_reason(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

/// Result type for authorization operations
pub type AuthResult<T> = Result<T, AuthError>;

impl From<RateLimitError> for AuthError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Cancelled => AuthError::Cancelled,
            RateLimitError::ConfigurationError(message) => AuthError::Configuration(message),
            quota @ RateLimitError::QuotaExceeded { .. } => AuthError::QuotaExceeded(quota),
        }
    }
}

impl Classify for AuthError {
    fn classify(&self) -> RetryClass {
        match self {
            AuthError::Remote(error) => classify(error),
            _ => RetryClass::Fatal,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            AuthError::Remote(error) => error.description(),
            AuthError::QuotaExceeded(_) => "local quota exhausted",
            _ => "authorization failed",
        }
    }
}

/// Token material returned by a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Access token
    pub access_token: String,
    /// Account name, when the remote reports it
    pub username: Option<String>,
}

/// Durable access credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    fingerprint: Fingerprint,
}

impl Credential {
    /// Create a credential
    pub fn new(
        access_token: impl Into<String>,
        username: Option<String>,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            username,
            fingerprint,
        }
    }

    /// Build a credential from an exchange result
    pub fn from_grant(grant: AccessGrant, fingerprint: Fingerprint) -> Self {
        Self::new(grant.access_token, grant.username, fingerprint)
    }

    /// Access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Account name
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Fingerprint of the consumer key this credential belongs to
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

// Keep the token out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("username", &self.username)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// The two token endpoints of the consent flow
#[async_trait]
pub trait AuthorizationApi: Send + Sync {
    /// Obtain a request token for the given redirect URI
    async fn request_token(&self, redirect_uri: &str) -> FetcherResult<String>;

    /// Exchange an approved request token for an access token
    async fn exchange_token(&self, request_token: &str) -> FetcherResult<AccessGrant>;
}
