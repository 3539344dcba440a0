//! Integration tests for retries around batch requests

use pocket_export::exporter::{
    CheckpointDisposition, ExportError, ExportExecutor, ExportJob, RetryPolicy,
};
use pocket_export::fetcher::FetcherError;
use pocket_export::output::{partial_path, OutputFormat};
use pocket_export::ExportMode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use crate::support::{credential, ids, json_item_ids, test_config, FakeLibrary};

fn timeout() -> FetcherError {
    FetcherError::NetworkTimeout("operation timed out".to_string())
}

fn json_job(dir: &TempDir) -> ExportJob {
    ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("export.json"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_transparently() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(250));
    library.fail_on_call(1, timeout());
    library.fail_on_call(2, FetcherError::ServerError {
        status: 503,
        retry_after: None,
        message: "maintenance".to_string(),
    });

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let summary = executor.execute(&json_job(&dir), &credential()).await.unwrap();

    assert_eq!(summary.items_written, 250);
    assert_eq!(json_item_ids(&summary.output_path), ids(1..=250));

    // The retried page was requested three times at the same offset
    let offsets: Vec<u64> = library.requests().iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 100, 100, 100, 200]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(10));
    library.fail_on_call(0, timeout());
    library.fail_on_call(1, timeout());
    library.fail_on_call(2, timeout());

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path())
        .unwrap()
        .with_retry_policy(
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60)).without_jitter(),
        );

    let start = Instant::now();
    executor.execute(&json_job(&dir), &credential()).await.unwrap();

    // 1s + 2s + 4s of backoff before the fourth attempt succeeds
    assert_eq!(start.elapsed(), Duration::from_secs(7));
    assert_eq!(library.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honored() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(10));
    library.fail_on_call(0, FetcherError::RateLimited {
        retry_after: Some(Duration::from_secs(42)),
        message: "too many requests".to_string(),
    });

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let start = Instant::now();
    executor.execute(&json_job(&dir), &credential()).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(42));
}

#[tokio::test(start_paused = true)]
async fn test_fourth_consecutive_failure_exhausts_retries() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(10));
    for call in 0..4 {
        library.fail_on_call(call, timeout());
    }

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = json_job(&dir);
    let error = executor.execute(&job, &credential()).await.unwrap_err();

    match &error {
        ExportError::Halted {
            offset,
            checkpoint,
            source,
            ..
        } => {
            assert_eq!(*offset, 0);
            assert_eq!(*checkpoint, CheckpointDisposition::Absent);
            match source.as_ref() {
                ExportError::RetryExhausted {
                    attempts,
                    last_error,
                } => {
                    assert_eq!(*attempts, 4);
                    assert_eq!(*last_error, timeout());
                }
                other => panic!("expected RetryExhausted, got {other:?}"),
            }
        }
        other => panic!("expected Halted, got {other:?}"),
    }
    assert_eq!(library.calls(), 4);
    assert!(error.remediation().unwrap().contains("network"));
    assert!(!job.output_path.exists());
    assert!(partial_path(&job.output_path).exists());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(10));
    library.fail_on_call(0, FetcherError::Forbidden("missing permission".to_string()));

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let error = executor.execute(&json_job(&dir), &credential()).await.unwrap_err();

    assert!(matches!(
        error.root(),
        ExportError::Request(FetcherError::Forbidden(_))
    ));
    assert_eq!(library.calls(), 1);
}
