//! Integration tests for checkpointing and resume

use async_trait::async_trait;
use pocket_export::auth::Credential;
use pocket_export::exporter::{CheckpointDisposition, ExportError, ExportExecutor, ExportJob};
use pocket_export::fetcher::{Batch, BatchRequest, FetcherError, FetcherResult, ItemFetcher};
use pocket_export::output::{partial_path, OutputFormat};
use pocket_export::resume::StateLayout;
use pocket_export::shutdown::{SharedShutdown, ShutdownCoordinator};
use pocket_export::ExportMode;
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::{credential, fingerprint, ids, json_item_ids, test_config, FakeLibrary};

fn forbidden() -> FetcherError {
    FetcherError::Forbidden("temporarily blocked".to_string())
}

fn full_json(dir: &TempDir) -> ExportJob {
    ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("library.json"),
    )
}

#[tokio::test]
async fn test_halt_then_resume_produces_complete_export() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(1000));
    library.fail_on_call(5, forbidden());
    let job = full_json(&dir);

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let error = executor.execute(&job, &credential()).await.unwrap_err();
    match &error {
        ExportError::Halted {
            offset,
            checkpoint,
            mode,
            ..
        } => {
            assert_eq!(*offset, 500);
            assert_eq!(*checkpoint, CheckpointDisposition::Preserved);
            assert_eq!(*mode, ExportMode::Full);
        }
        other => panic!("expected Halted, got {other:?}"),
    }

    let store = StateLayout::new(dir.path()).checkpoint_store();
    let checkpoint = store.load(&fingerprint(), ExportMode::Full).unwrap();
    assert_eq!(checkpoint.offset(), 500);
    assert_eq!(checkpoint.items_written(), 500);
    assert!(!job.output_path.exists());
    assert!(partial_path(&job.output_path).exists());

    library.reset_requests();
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let summary = executor.execute(&job, &credential()).await.unwrap();

    assert_eq!(library.requests()[0].offset, 500);
    assert!(summary.resumed);
    assert_eq!(summary.items_this_run, 500);
    assert_eq!(summary.items_written, 1000);
    assert_eq!(json_item_ids(&job.output_path), ids(1..=1000));
    assert!(store.load(&fingerprint(), ExportMode::Full).is_none());
    assert!(!partial_path(&job.output_path).exists());
}

#[tokio::test]
async fn test_halt_between_intervals_still_checkpoints() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(600));
    library.fail_on_call(3, forbidden());
    let job = full_json(&dir);

    let mut config = test_config(100);
    config.checkpoint_interval = 1000;
    let executor = ExportExecutor::new(Arc::clone(&library), config.clone(), dir.path()).unwrap();
    let error = executor.execute(&job, &credential()).await.unwrap_err();
    assert!(matches!(
        error,
        ExportError::Halted {
            offset: 300,
            checkpoint: CheckpointDisposition::Preserved,
            ..
        }
    ));

    library.reset_requests();
    let executor = ExportExecutor::new(Arc::clone(&library), config, dir.path()).unwrap();
    let summary = executor.execute(&job, &credential()).await.unwrap();
    assert_eq!(library.requests()[0].offset, 300);
    assert_eq!(json_item_ids(&summary.output_path), ids(1..=600));
}

#[tokio::test]
async fn test_resume_continues_csv_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(350));
    library.fail_on_call(2, forbidden());
    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Csv,
        dir.path().join("library.csv"),
    );

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    assert!(executor.execute(&job, &credential()).await.is_err());
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    executor.execute(&job, &credential()).await.unwrap();

    let mut reader = csv::Reader::from_path(&job.output_path).unwrap();
    let exported: Vec<String> = reader
        .records()
        .map(|record| record.unwrap()[0].to_string())
        .collect();
    assert_eq!(exported, ids(1..=350));
}

/// Requests shutdown once the wrapped library has served `after` pages
struct ShutdownAfter {
    inner: Arc<FakeLibrary>,
    shutdown: SharedShutdown,
    after: usize,
}

#[async_trait]
impl ItemFetcher for ShutdownAfter {
    async fn fetch_batch(
        &self,
        credential: &Credential,
        request: &BatchRequest,
    ) -> FetcherResult<Batch> {
        let batch = self.inner.fetch_batch(credential, request).await;
        if self.inner.calls() >= self.after {
            self.shutdown.request_shutdown();
        }
        batch
    }
}

#[tokio::test]
async fn test_shutdown_stops_at_batch_boundary_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(1000));
    let shutdown = ShutdownCoordinator::shared();
    let fetcher = ShutdownAfter {
        inner: Arc::clone(&library),
        shutdown: shutdown.clone(),
        after: 2,
    };
    let job = full_json(&dir);

    let executor = ExportExecutor::new(fetcher, test_config(100), dir.path())
        .unwrap()
        .with_shutdown(shutdown);
    let error = executor.execute(&job, &credential()).await.unwrap_err();

    assert!(error.is_cancelled());
    assert!(matches!(
        error,
        ExportError::Halted {
            offset: 200,
            checkpoint: CheckpointDisposition::Preserved,
            ..
        }
    ));
    assert_eq!(library.calls(), 2);

    library.reset_requests();
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let summary = executor.execute(&job, &credential()).await.unwrap();
    assert_eq!(library.requests()[0].offset, 200);
    assert_eq!(json_item_ids(&summary.output_path), ids(1..=1000));
}

#[tokio::test]
async fn test_corrupt_checkpoint_restarts_from_zero() {
    let dir = TempDir::new().unwrap();
    let store = StateLayout::new(dir.path()).checkpoint_store();
    let path = store.path_for(&fingerprint(), ExportMode::Full);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    let library = Arc::new(FakeLibrary::with_items(120));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let summary = executor.execute(&full_json(&dir), &credential()).await.unwrap();

    assert_eq!(library.requests()[0].offset, 0);
    assert!(!summary.resumed);
    assert_eq!(summary.items_written, 120);
}

#[tokio::test]
async fn test_missing_partial_output_restarts_from_zero() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(400));
    library.fail_on_call(2, forbidden());
    let job = full_json(&dir);

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    assert!(executor.execute(&job, &credential()).await.is_err());
    std::fs::remove_file(partial_path(&job.output_path)).unwrap();

    library.reset_requests();
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let summary = executor.execute(&job, &credential()).await.unwrap();

    assert_eq!(library.requests()[0].offset, 0);
    assert_eq!(json_item_ids(&summary.output_path), ids(1..=400));
}

#[tokio::test]
async fn test_checkpoints_are_per_mode() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(300));
    library.fail_on_call(1, forbidden());

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    assert!(executor.execute(&full_json(&dir), &credential()).await.is_err());

    // An incremental run neither sees nor clears the full export's checkpoint
    library.reset_requests();
    let incremental = ExportJob::new(
        ExportMode::Incremental,
        OutputFormat::Json,
        dir.path().join("delta.json"),
    );
    executor.execute(&incremental, &credential()).await.unwrap();
    assert_eq!(library.requests()[0].offset, 0);

    let store = StateLayout::new(dir.path()).checkpoint_store();
    assert_eq!(
        store.load(&fingerprint(), ExportMode::Full).unwrap().offset(),
        100
    );
}
