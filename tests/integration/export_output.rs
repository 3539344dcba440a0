//! Integration tests for the files an export produces

use pocket_export::exporter::{ExportError, ExportExecutor, ExportJob};
use pocket_export::fetcher::FetcherError;
use pocket_export::output::csv::CSV_HEADER;
use pocket_export::output::{partial_path, OutputFormat};
use pocket_export::resume::StateLayout;
use pocket_export::ExportMode;
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::{credential, fingerprint, ids, json_item_ids, test_config, FakeLibrary};

#[tokio::test]
async fn test_json_document_framing() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(3));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = ExportJob::new(
        ExportMode::Incremental,
        OutputFormat::Json,
        dir.path().join("out.json"),
    );

    let summary = executor.execute(&job, &credential()).await.unwrap();
    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.output_path).unwrap()).unwrap();

    assert_eq!(document["export_type"], "incremental");
    assert_eq!(document["total_items"], 3);
    assert!(chrono::DateTime::parse_from_rfc3339(document["export_date"].as_str().unwrap()).is_ok());
    let first = &document["items"][0];
    assert_eq!(first["item_id"], "1");
    assert_eq!(first["status"], "unread");
    assert_eq!(first["tags"], serde_json::json!(["rust"]));
}

#[tokio::test]
async fn test_csv_rows_follow_header() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(205));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Csv,
        dir.path().join("out.csv"),
    );

    let summary = executor.execute(&job, &credential()).await.unwrap();
    let mut reader = csv::Reader::from_path(&summary.output_path).unwrap();

    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(header, CSV_HEADER.to_vec());

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 205);
    assert_eq!(&rows[0][0], "1");
    assert_eq!(&rows[0][6], "An excerpt, with a comma");
    assert_eq!(&rows[204][0], "205");
}

#[tokio::test]
async fn test_empty_library_yields_valid_files() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(0));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();

    let json = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("empty.json"),
    );
    let summary = executor.execute(&json, &credential()).await.unwrap();
    assert_eq!(summary.items_written, 0);
    assert!(json_item_ids(&summary.output_path).is_empty());

    let csv_job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Csv,
        dir.path().join("empty.csv"),
    );
    let summary = executor.execute(&csv_job, &credential()).await.unwrap();
    let content = std::fs::read_to_string(&summary.output_path).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.starts_with("item_id,resolved_id,"));
}

#[tokio::test]
async fn test_output_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(5));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("nested").join("deeper").join("out.json"),
    );

    let summary = executor.execute(&job, &credential()).await.unwrap();
    assert_eq!(summary.output_path, job.output_path);
    assert_eq!(json_item_ids(&job.output_path), ids(1..=5));
}

#[tokio::test]
async fn test_directory_as_output_is_rejected() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(5));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = ExportJob::new(ExportMode::Full, OutputFormat::Json, dir.path().to_path_buf());

    let error = executor.execute(&job, &credential()).await.unwrap_err();
    assert!(matches!(error, ExportError::Configuration(_)));
    assert_eq!(library.calls(), 0);
}

#[tokio::test]
async fn test_format_change_restarts_export() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(300));
    library.fail_on_call(1, FetcherError::Forbidden("blocked".to_string()));

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let json = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("out.json"),
    );
    assert!(executor.execute(&json, &credential()).await.is_err());

    library.reset_requests();
    let csv_job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Csv,
        dir.path().join("out.csv"),
    );
    let summary = executor.execute(&csv_job, &credential()).await.unwrap();

    assert_eq!(library.requests()[0].offset, 0);
    assert!(!summary.resumed);
    assert_eq!(summary.items_written, 300);
    let store = StateLayout::new(dir.path()).checkpoint_store();
    assert!(store.load(&fingerprint(), ExportMode::Full).is_none());
    // The abandoned JSON partial is left for the user to inspect
    assert!(partial_path(&json.output_path).exists());
}
