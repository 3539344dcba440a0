//! Dual-window request rate limiting
//!
//! Each [`RateLimiter`] owns one hourly and one daily [`RateWindow`]. A window keeps the
//! instants of the grants it has handed out within its length; a grant leaves the window
//! once it is older than the window length, so the count can never exceed the limit over
//! any rolling interval. Limiters are built per credential fingerprint; clones are handles
//! onto the same windows, so the handshake and the fetch loop draw from one quota.
//!
//! On top of the windows, consecutive grants are spaced by a pacing interval of
//! `base * 1.5^errors` (capped), where `errors` counts remote failures reported through
//! [`RateLimiter::record_failure`] since the last [`RateLimiter::record_success`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ExportConfig;
use crate::metrics::record_rate_limit_wait;
use crate::shutdown::{sleep_or_shutdown, SharedShutdown};

/// One hour
pub const HOUR: Duration = Duration::from_secs(60 * 60);

/// One day
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Growth of the pacing interval per consecutive remote failure
const PACING_GROWTH: f64 = 1.5;

/// Consecutive failures beyond this no longer widen the pacing interval
const MAX_PACING_STEPS: u32 = 10;

/// Granularity of a rate window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Rolling hour
    Hourly,
    /// Rolling day
    Daily,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::Hourly => f.write_str("hourly"),
            WindowKind::Daily => f.write_str("daily"),
        }
    }
}

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// A limit below 1 was configured
    #[error("invalid rate limit configuration: {0}")]
    ConfigurationError(String),

    /// A window stays saturated longer than the caller is willing to wait
    #[error("{window} quota exhausted: next request allowed in {}s", .wait.as_secs())]
    QuotaExceeded {
        /// Window that blocks the request
        window: WindowKind,
        /// Time until that window admits another request
        wait: Duration,
    },

    /// Shutdown was requested while waiting for quota
    #[error("rate limit wait cancelled by shutdown")]
    Cancelled,
}

/// A rolling window bounding the number of grants within `length`
#[derive(Debug, Clone)]
pub struct RateWindow {
    kind: WindowKind,
    limit: u32,
    length: Duration,
    grants: VecDeque<Instant>,
}

impl RateWindow {
    /// Create an empty window
    pub fn new(kind: WindowKind, limit: u32, length: Duration) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ConfigurationError(format!(
                "{kind} limit must be at least 1"
            )));
        }
        Ok(Self {
            kind,
            limit,
            length,
            grants: VecDeque::with_capacity(limit.min(1024) as usize),
        })
    }

    /// Window granularity
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Configured limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Grants currently inside the window
    pub fn count(&self) -> u32 {
        self.grants.len() as u32
    }

    /// Instant of the oldest grant still inside the window
    pub fn window_start(&self) -> Option<Instant> {
        self.grants.front().copied()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if now.saturating_duration_since(oldest) >= self.length {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_saturated(&self) -> bool {
        self.grants.len() as u32 >= self.limit
    }

    /// Time until the oldest grant expires, zero when not saturated
    fn wait_time(&self, now: Instant) -> Duration {
        if !self.is_saturated() {
            return Duration::ZERO;
        }
        self.grants
            .front()
            .map(|&oldest| (oldest + self.length).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    fn record(&mut self, now: Instant) {
        self.grants.push_back(now);
    }
}

/// Minimum spacing between grants, widened by consecutive remote failures
#[derive(Debug, Clone, Copy, Default)]
struct Pacing {
    base: Duration,
    max: Duration,
    consecutive_errors: u32,
    last_grant: Option<Instant>,
}

impl Pacing {
    fn interval(&self) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }
        let steps = self.consecutive_errors.min(MAX_PACING_STEPS) as i32;
        let secs = self.base.as_secs_f64() * PACING_GROWTH.powi(steps);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max)
            .min(self.max)
    }

    fn wait_time(&self, now: Instant) -> Duration {
        let Some(last) = self.last_grant else {
            return Duration::ZERO;
        };
        let interval = self.interval();
        last.checked_add(interval)
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or(interval)
    }
}

/// Why a grant was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocked {
    Window(WindowKind, Duration),
    Pacing(Duration),
}

#[derive(Debug)]
struct Windows {
    hourly: RateWindow,
    daily: RateWindow,
    pacing: Pacing,
}

impl Windows {
    /// Grant if both windows have room and the pacing interval has passed
    fn try_grant(&mut self, now: Instant) -> Result<(), Blocked> {
        self.hourly.evict_expired(now);
        self.daily.evict_expired(now);

        let blocked: Vec<(WindowKind, Duration)> = [&self.hourly, &self.daily]
            .into_iter()
            .filter(|w| w.is_saturated())
            .map(|w| (w.kind(), w.wait_time(now)))
            .collect();

        // Sleep until the earliest window clears, then re-check both
        if let Some(&(kind, wait)) = blocked.iter().min_by_key(|(_, wait)| *wait) {
            return Err(Blocked::Window(kind, wait));
        }

        let pace = self.pacing.wait_time(now);
        if !pace.is_zero() {
            return Err(Blocked::Pacing(pace));
        }

        self.hourly.record(now);
        self.daily.record(now);
        self.pacing.last_grant = Some(now);
        Ok(())
    }
}

/// Local hourly and daily request quota with request pacing
///
/// Cloning yields another handle onto the same windows and pacing state; only the
/// shutdown handle is per clone.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<Windows>>,
    max_wait: Duration,
    shutdown: Option<SharedShutdown>,
}

impl RateLimiter {
    /// Create a limiter with the given per-hour and per-day limits
    ///
    /// # Errors
    /// Returns `ConfigurationError` if either limit is below 1.
    pub fn new(hourly_limit: u32, daily_limit: u32) -> Result<Self, RateLimitError> {
        Self::with_windows(
            RateWindow::new(WindowKind::Hourly, hourly_limit, HOUR)?,
            RateWindow::new(WindowKind::Daily, daily_limit, DAY)?,
        )
    }

    /// Create a limiter from explicit windows
    pub fn with_windows(hourly: RateWindow, daily: RateWindow) -> Result<Self, RateLimitError> {
        Ok(Self {
            windows: Arc::new(Mutex::new(Windows {
                hourly,
                daily,
                pacing: Pacing::default(),
            })),
            max_wait: DAY,
            shutdown: None,
        })
    }

    /// Limiter with the quota, wait ceiling and pacing of `config`
    pub fn from_config(config: &ExportConfig) -> Result<Self, RateLimitError> {
        Ok(Self::new(config.hourly_limit, config.daily_limit)?
            .with_max_wait(config.max_quota_wait())
            .with_pacing(config.base_delay(), config.max_delay()))
    }

    /// Space grants by at least `base`, growing by 1.5x per consecutive failure up to `max`
    ///
    /// A zero `base` disables pacing, which is the default.
    pub fn with_pacing(self, base: Duration, max: Duration) -> Self {
        {
            let mut windows = self.lock_windows();
            windows.pacing.base = base;
            windows.pacing.max = max.max(base);
        }
        self
    }

    /// Set the longest quota wait accepted before failing with `QuotaExceeded`
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Interrupt quota waits when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current (hourly, daily) grant counts
    pub fn counts(&self) -> (u32, u32) {
        let mut windows = self.lock_windows();
        let now = Instant::now();
        windows.hourly.evict_expired(now);
        windows.daily.evict_expired(now);
        (windows.hourly.count(), windows.daily.count())
    }

    /// Current pacing interval between grants
    pub fn pacing_interval(&self) -> Duration {
        self.lock_windows().pacing.interval()
    }

    /// Report a successful remote request, resetting the pacing interval
    pub fn record_success(&self) {
        self.lock_windows().pacing.consecutive_errors = 0;
    }

    /// Report a failed remote request, widening the pacing interval
    pub fn record_failure(&self) {
        let mut windows = self.lock_windows();
        windows.pacing.consecutive_errors = windows.pacing.consecutive_errors.saturating_add(1);
        debug!(
            consecutive_errors = windows.pacing.consecutive_errors,
            interval_ms = windows.pacing.interval().as_millis() as u64,
            "Request pacing widened"
        );
    }

    /// Wait for quota in both windows and for the pacing interval, then consume one grant
    ///
    /// # Errors
    /// - `QuotaExceeded` if the required wait is longer than the configured maximum
    /// - `Cancelled` if shutdown is requested while waiting
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let started = Instant::now();
        loop {
            let blocked = {
                let mut windows = self.lock_windows();
                windows.try_grant(Instant::now())
            };

            let (window, wait) = match blocked {
                Ok(()) => {
                    record_rate_limit_wait(started.elapsed());
                    return Ok(());
                }
                Err(Blocked::Window(window, wait)) => (window, wait),
                Err(Blocked::Pacing(wait)) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Pacing request");
                    if !sleep_or_shutdown(wait, self.shutdown.as_ref()).await {
                        return Err(RateLimitError::Cancelled);
                    }
                    continue;
                }
            };

            if wait > self.max_wait {
                warn!(
                    window = %window,
                    wait_secs = wait.as_secs(),
                    max_wait_secs = self.max_wait.as_secs(),
                    "Local quota exhausted beyond wait ceiling"
                );
                return Err(RateLimitError::QuotaExceeded { window, wait });
            }

            warn!(
                window = %window,
                wait_secs = wait.as_secs_f64(),
                "Rate limit reached, waiting for window to clear"
            );
            if !sleep_or_shutdown(wait, self.shutdown.as_ref()).await {
                debug!("Rate limit wait interrupted by shutdown");
                return Err(RateLimitError::Cancelled);
            }
        }
    }

    fn lock_windows(&self) -> std::sync::MutexGuard<'_, Windows> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
