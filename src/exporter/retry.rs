//! Classification-driven retry with exponential backoff
//!
//! The executor is a small loop around three pieces: a pure [`Classify`] decision for each
//! failure, the [`RetryPolicy::delay`] backoff formula, and a shutdown-aware sleep. Fatal
//! errors return at once without consuming a retry; transient errors back off; errors that
//! carry an explicit server delay wait exactly that long.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::retry_formatter::RetryContext;
use crate::fetcher::FetcherError;
use crate::metrics::record_retry;
use crate::shutdown::{sleep_or_shutdown, SharedShutdown};

/// Retry decision for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Do not retry
    Fatal,
    /// Retry after exponential backoff
    Transient,
    /// Retry after exactly this delay
    RetryAfter(Duration),
}

/// Errors that know how they should be retried
pub trait Classify {
    /// Decide whether and when a failed attempt is retried
    fn classify(&self) -> RetryClass;

    /// Short description used in retry log lines
    fn describe(&self) -> &'static str {
        "request failed"
    }
}

impl Classify for FetcherError {
    fn classify(&self) -> RetryClass {
        classify(self)
    }

    fn describe(&self) -> &'static str {
        self.description()
    }
}

/// Classify a remote request failure
pub fn classify(error: &FetcherError) -> RetryClass {
    match error {
        FetcherError::NetworkTimeout(_)
        | FetcherError::NetworkError(_)
        | FetcherError::BodyError(_) => RetryClass::Transient,
        FetcherError::RateLimited { retry_after, .. }
        | FetcherError::ServerError { retry_after, .. } => match retry_after {
            Some(delay) => RetryClass::RetryAfter(*delay),
            None => RetryClass::Transient,
        },
        FetcherError::CredentialRejected(_)
        | FetcherError::QuotaExhausted(_)
        | FetcherError::Forbidden(_)
        | FetcherError::ClientError { .. }
        | FetcherError::ParseError(_) => RetryClass::Fatal,
    }
}

/// Outcome of a request whose retries did not end in success
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The error was classified fatal
    #[error("{0}")]
    Fatal(E),

    /// Every allowed attempt failed
    #[error("request failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Total attempts made, `max_retries + 1`
        attempts: u32,
        /// Error of the final attempt
        last_error: E,
    },

    /// Shutdown was requested during a backoff sleep
    #[error("retry cancelled by shutdown")]
    Cancelled,
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff base
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Whether to add random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with jitter enabled
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Disable jitter, making delays deterministic
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff before the retry that follows failure `attempt` (0-based)
    ///
    /// `delay = min(base * 2^attempt + jitter, max_delay)` where `jitter` is
    /// `jitter_fraction * base * 2^attempt` and `jitter_fraction` lies in `[0, 1)`.
    pub fn delay(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let exp = self
            .base_delay
            .as_secs_f64()
            * 2f64.powi(attempt.min(62) as i32);
        let jitter = exp * jitter_fraction.clamp(0.0, 1.0);
        let delay = (exp + jitter).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(self.max_delay)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let fraction = if self.jitter {
            rand::thread_rng().gen_range(0.0..1.0)
        } else {
            0.0
        };
        self.delay(attempt, fraction)
    }
}

/// Runs one logical request with retries
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl RetryExecutor {
    /// Create an executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            shutdown: None,
        }
    }

    /// Interrupt backoff sleeps when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt_fn` until it succeeds, fails fatally, or retries run out
    ///
    /// `attempt_fn` receives the 0-based attempt number. The attempt counter resets only
    /// on success, so it counts consecutive failures of this one request.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut attempt_fn: F) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            let error = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(label, attempts = attempt + 1, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = error.classify();
            if class == RetryClass::Fatal {
                debug!(label, error = %error, "Fatal error, not retrying");
                return Err(RetryError::Fatal(error));
            }

            if attempt >= self.policy.max_retries {
                let context = RetryContext::new(
                    attempt + 1,
                    max_attempts,
                    error.describe(),
                    Duration::ZERO,
                    label,
                    error.to_string(),
                );
                error!("{}", context.format_failure());
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last_error: error,
                });
            }

            let delay = match class {
                RetryClass::RetryAfter(delay) => delay,
                _ => self.policy.next_delay(attempt),
            };

            let context = RetryContext::new(
                attempt + 1,
                max_attempts,
                error.describe(),
                delay,
                label,
                error.to_string(),
            );
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "{}",
                context.format_retry()
            );
            record_retry(label, error.describe());

            if !sleep_or_shutdown(delay, self.shutdown.as_ref()).await {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
        }
    }
}
