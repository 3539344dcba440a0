//! Export configuration
//!
//! Defaults mirror the limits the remote service publishes. A JSON file may override any
//! subset of fields; CLI flags override the file.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::ExportError;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "pocket_config.json";

/// Largest page size the remote API accepts per request
pub const REMOTE_MAX_BATCH_SIZE: u32 = 5000;

/// Longest backoff delay, in seconds, a configuration may ask for
pub const MAX_DELAY_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Default remote API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://getpocket.com/v3";

/// Default consent page URL
pub const DEFAULT_AUTH_URL: &str = "https://getpocket.com/auth/authorize";

/// Tunables for one export run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Items requested per page
    pub batch_size: u32,
    /// Retries after the first failed attempt of a request
    pub max_retries: u32,
    /// Base backoff delay in seconds
    pub base_delay: f64,
    /// Backoff ceiling in seconds
    pub max_delay: f64,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Seconds to wait for the user to approve access
    pub oauth_timeout: u64,
    /// Items between checkpoints
    pub checkpoint_interval: u64,
    /// Requests allowed in any rolling day
    pub daily_limit: u32,
    /// Requests allowed in any rolling hour
    pub hourly_limit: u32,
    /// Longest local quota wait, in seconds, before giving up with `QuotaExceeded`
    pub max_quota_wait: u64,
    /// Loopback address the authorization callback listener binds
    pub callback_addr: String,
    /// Path the consent page redirects back to
    pub callback_path: String,
    /// Remote API base URL
    pub api_base_url: String,
    /// Consent page URL
    pub auth_url: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_retries: 5,
            base_delay: 1.0,
            max_delay: 60.0,
            timeout: 30,
            oauth_timeout: 300,
            checkpoint_interval: 100,
            daily_limit: 9500,
            hourly_limit: 300,
            max_quota_wait: 3600,
            callback_addr: "127.0.0.1:8080".to_string(),
            callback_path: "/auth".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
        }
    }
}

impl ExportConfig {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults. A file that exists but cannot be read or parsed
    /// is a configuration error, so a typo never silently falls back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ExportError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ExportError::Configuration(format!("invalid config file {}: {e}", path.display()))
        })?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Override the page size
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check every limit before any network call is made
    pub fn validate(&self) -> Result<(), ExportError> {
        let fail = |msg: String| -> Result<(), ExportError> { Err(ExportError::Configuration(msg)) };

        if self.batch_size == 0 || self.batch_size > REMOTE_MAX_BATCH_SIZE {
            return fail(format!(
                "batch_size must be between 1 and {REMOTE_MAX_BATCH_SIZE}, got {}",
                self.batch_size
            ));
        }
        if self.daily_limit == 0 || self.hourly_limit == 0 {
            return fail(format!(
                "rate limits must be at least 1 (daily_limit={}, hourly_limit={})",
                self.daily_limit, self.hourly_limit
            ));
        }
        // Comparisons are false for NaN, so these also reject non-numbers
        if !(self.base_delay > 0.0 && self.base_delay <= MAX_DELAY_SECS) {
            return fail(format!(
                "base_delay must be positive and at most {MAX_DELAY_SECS} seconds, got {}",
                self.base_delay
            ));
        }
        if !(self.max_delay >= self.base_delay && self.max_delay <= MAX_DELAY_SECS) {
            return fail(format!(
                "max_delay ({}) must be at least base_delay ({}) and at most {MAX_DELAY_SECS} seconds",
                self.max_delay, self.base_delay
            ));
        }
        if self.timeout == 0 || self.oauth_timeout == 0 {
            return fail("timeout and oauth_timeout must be at least 1 second".to_string());
        }
        if self.checkpoint_interval == 0 {
            return fail("checkpoint_interval must be at least 1".to_string());
        }
        if !self.callback_path.starts_with('/') {
            return fail(format!(
                "callback_path must start with '/', got {:?}",
                self.callback_path
            ));
        }
        self.callback_socket_addr()?;
        url::Url::parse(&self.api_base_url).map_err(|e| {
            ExportError::Configuration(format!("invalid api_base_url {:?}: {e}", self.api_base_url))
        })?;
        url::Url::parse(&self.auth_url).map_err(|e| {
            ExportError::Configuration(format!("invalid auth_url {:?}: {e}", self.auth_url))
        })?;
        Ok(())
    }

    /// Parsed callback listener address
    pub fn callback_socket_addr(&self) -> Result<SocketAddr, ExportError> {
        self.callback_addr.parse().map_err(|e| {
            ExportError::Configuration(format!(
                "invalid callback_addr {:?}: {e}",
                self.callback_addr
            ))
        })
    }

    /// Base backoff delay, clamped to the range [`validate`](Self::validate) accepts
    pub fn base_delay(&self) -> Duration {
        delay_from_secs(self.base_delay)
    }

    /// Backoff ceiling, clamped to the range [`validate`](Self::validate) accepts
    pub fn max_delay(&self) -> Duration {
        delay_from_secs(self.max_delay)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Authorization wait ceiling
    pub fn oauth_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth_timeout)
    }

    /// Local quota wait ceiling
    pub fn max_quota_wait(&self) -> Duration {
        Duration::from_secs(self.max_quota_wait)
    }
}

fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}
