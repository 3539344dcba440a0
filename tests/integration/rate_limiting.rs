//! Integration tests for local quota enforcement

use pocket_export::exporter::rate_limit::{DAY, HOUR};
use pocket_export::exporter::{
    CheckpointDisposition, ExportError, ExportExecutor, ExportJob, RateLimitError, RateLimiter,
    RateWindow, RetryPolicy, WindowKind,
};
use pocket_export::fetcher::FetcherError;
use pocket_export::output::OutputFormat;
use pocket_export::ExportMode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use crate::support::{credential, test_config, FakeLibrary};

#[tokio::test(start_paused = true)]
async fn test_no_rolling_hour_exceeds_limit() {
    let limiter = RateLimiter::new(3, 1000).unwrap();
    let mut grants = Vec::new();
    for _ in 0..10 {
        limiter.acquire().await.unwrap();
        grants.push(Instant::now());
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
    }

    for window in grants.windows(4) {
        assert!(
            window[3] - window[0] >= HOUR,
            "four grants within {:?}",
            window[3] - window[0]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_daily_window_is_enforced_independently() {
    let limiter = RateLimiter::with_windows(
        RateWindow::new(WindowKind::Hourly, 100, HOUR).unwrap(),
        RateWindow::new(WindowKind::Daily, 2, DAY).unwrap(),
    )
    .unwrap();
    let start = Instant::now();
    limiter.acquire().await.unwrap();
    limiter.acquire().await.unwrap();
    limiter.acquire().await.unwrap();

    assert!(start.elapsed() >= DAY);
    assert_eq!(limiter.counts(), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_export_requests_are_spaced_by_hourly_quota() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(450));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path())
        .unwrap()
        .with_limiter(RateLimiter::new(2, 100).unwrap());

    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("export.json"),
    );
    let start = Instant::now();
    let summary = executor.execute(&job, &credential()).await.unwrap();

    // Five pages at two per hour: grants at 0, 0, 1h, 1h, 2h
    assert_eq!(library.calls(), 5);
    assert_eq!(summary.items_written, 450);
    assert!(start.elapsed() >= 2 * HOUR);
    assert!(start.elapsed() < 3 * HOUR);
}

#[tokio::test(start_paused = true)]
async fn test_requests_are_paced_and_slow_down_after_errors() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(450));
    library.fail_on_call(1, FetcherError::NetworkTimeout("timed out".to_string()));
    let mut config = test_config(100);
    config.base_delay = 1.0;
    config.max_delay = 4.0;
    let executor = ExportExecutor::new(Arc::clone(&library), config, dir.path())
        .unwrap()
        .with_retry_policy(
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60)).without_jitter(),
        );

    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("export.json"),
    );
    let start = Instant::now();
    let summary = executor.execute(&job, &credential()).await.unwrap();

    // Requests at 0s and 1s (fails); after a 1s backoff the next request still waits for the
    // widened 1.5s interval (2.5s); then back to 1s spacing: 3.5s, 4.5s, 5.5s
    assert_eq!(library.calls(), 6);
    assert_eq!(summary.items_written, 450);
    assert_eq!(start.elapsed(), Duration::from_millis(5500));
}

#[tokio::test(start_paused = true)]
async fn test_quota_beyond_wait_ceiling_halts_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(300));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path())
        .unwrap()
        .with_limiter(
            RateLimiter::new(1, 100)
                .unwrap()
                .with_max_wait(Duration::from_secs(60)),
        );

    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("export.json"),
    );
    let error = executor.execute(&job, &credential()).await.unwrap_err();

    match &error {
        ExportError::Halted {
            offset,
            checkpoint,
            source,
            ..
        } => {
            assert_eq!(*offset, 100);
            assert_eq!(*checkpoint, CheckpointDisposition::Preserved);
            assert!(matches!(
                source.as_ref(),
                ExportError::QuotaExceeded(RateLimitError::QuotaExceeded {
                    window: WindowKind::Hourly,
                    ..
                })
            ));
        }
        other => panic!("expected Halted, got {other:?}"),
    }
    // The refused request never reached the remote
    assert_eq!(library.calls(), 1);
    assert!(!dir.path().join("export.json").exists());
}
