//! Integration tests for the consent handshake and credential handling

use pocket_export::auth::handshake::ensure_credential;
use pocket_export::auth::{
    AuthError, Credential, Handshake, HandshakeState, MemorySecretStore, SecretStore,
};
use pocket_export::exporter::{
    CheckpointDisposition, ExportConfig, ExportError, ExportExecutor, ExportJob, RateLimitError,
    RateLimiter, RetryExecutor, RetryPolicy, WindowKind,
};
use pocket_export::fetcher::FetcherError;
use pocket_export::output::OutputFormat;
use pocket_export::resume::{ExportLock, ResumeError, StateLayout};
use pocket_export::shutdown::ShutdownCoordinator;
use pocket_export::ExportMode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::support::{
    credential, fingerprint, free_loopback_addr, ids, json_item_ids, test_config, FakeAuthApi,
    FakeLibrary, RedirectingPrompt, SilentPrompt,
};

fn handshake(oauth_timeout: u64) -> (Handshake, std::net::SocketAddr) {
    let addr = free_loopback_addr();
    let config = ExportConfig {
        callback_addr: addr.to_string(),
        oauth_timeout,
        ..ExportConfig::default()
    };
    let retry = RetryExecutor::new(RetryPolicy::default().without_jitter());
    (Handshake::new(&config, retry).unwrap(), addr)
}

#[tokio::test]
async fn test_approved_consent_yields_credential() {
    let (mut handshake, addr) = handshake(10);
    let api = FakeAuthApi::default();

    let credential = handshake
        .run(&api, &RedirectingPrompt { query: "" }, &fingerprint())
        .await
        .unwrap();

    assert_eq!(credential.access_token(), "fresh-access-token");
    assert_eq!(credential.username(), Some("reader"));
    assert_eq!(credential.fingerprint(), &fingerprint());
    assert_eq!(handshake.state(), HandshakeState::Authorized);
    assert_eq!(api.redirect_uris(), vec![format!("http://{addr}/auth")]);
}

#[tokio::test]
async fn test_handshake_requests_consume_shared_quota() {
    let (handshake, _) = handshake(10);
    let limiter = RateLimiter::new(10, 100).unwrap();
    let mut handshake = handshake.with_limiter(limiter.clone());
    let api = FakeAuthApi::default();

    handshake
        .run(&api, &RedirectingPrompt { query: "" }, &fingerprint())
        .await
        .unwrap();

    // Token request and exchange both count against the quota the export will use
    assert_eq!(limiter.counts(), (2, 2));
}

#[tokio::test]
async fn test_exhausted_quota_blocks_handshake() {
    let (handshake, _) = handshake(10);
    let limiter = RateLimiter::new(1, 100)
        .unwrap()
        .with_max_wait(Duration::from_secs(60));
    limiter.acquire().await.unwrap();
    let mut handshake = handshake.with_limiter(limiter.clone());
    let api = FakeAuthApi::default();

    let error = handshake
        .run(&api, &RedirectingPrompt { query: "" }, &fingerprint())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        AuthError::QuotaExceeded(RateLimitError::QuotaExceeded {
            window: WindowKind::Hourly,
            ..
        })
    ));
    assert!(api.redirect_uris().is_empty());
    assert_eq!(limiter.counts(), (1, 1));
}

#[tokio::test]
async fn test_denied_consent() {
    let (mut handshake, _) = handshake(10);
    let api = FakeAuthApi::default();

    let error = handshake
        .run(
            &api,
            &RedirectingPrompt {
                query: "?error=access_denied",
            },
            &fingerprint(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        AuthError::Denied { reason: Some(ref r) } if r == "access_denied"
    ));
    assert_eq!(handshake.state(), HandshakeState::Denied);
    assert_eq!(api.exchanges(), 0);
}

#[tokio::test]
async fn test_timeout_releases_callback_port() {
    let (mut handshake, addr) = handshake(1);
    let api = FakeAuthApi::default();

    let started = std::time::Instant::now();
    let error = handshake
        .run(&api, &SilentPrompt, &fingerprint())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        error,
        AuthError::TimedOut { timeout } if timeout == Duration::from_secs(1)
    ));
    assert!(
        elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2),
        "gave up after {elapsed:?}"
    );
    assert_eq!(handshake.state(), HandshakeState::TimedOut);
    assert!(std::net::TcpListener::bind(addr).is_ok());
}

#[tokio::test]
async fn test_shutdown_cancels_wait_for_consent() {
    let (handshake, addr) = handshake(30);
    let shutdown = ShutdownCoordinator::shared();
    let mut handshake = handshake.with_shutdown(shutdown.clone());
    let api = FakeAuthApi::default();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.request_shutdown();
    });

    let error = handshake
        .run(&api, &SilentPrompt, &fingerprint())
        .await
        .unwrap_err();
    assert!(matches!(error, AuthError::Cancelled));
    assert!(std::net::TcpListener::bind(addr).is_ok());
}

#[tokio::test]
async fn test_saved_credential_skips_handshake() {
    let (mut handshake, _) = handshake(10);
    let api = FakeAuthApi::default();
    let store = MemorySecretStore::new();
    let prompt = RedirectingPrompt { query: "" };

    let first = ensure_credential(&store, &mut handshake, &api, &prompt, &fingerprint())
        .await
        .unwrap();
    let second = ensure_credential(&store, &mut handshake, &api, &prompt, &fingerprint())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(api.exchanges(), 1);
    assert_eq!(store.get(&fingerprint()).unwrap(), Some(first));
}

#[tokio::test]
async fn test_rejected_credential_halts_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let library = Arc::new(FakeLibrary::with_items(500));
    library.fail_on_call(2, FetcherError::CredentialRejected("HTTP 401".to_string()));
    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("library.json"),
    );

    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let error = executor.execute(&job, &credential()).await.unwrap_err();

    assert!(error.is_credential_rejected());
    assert!(matches!(
        error,
        ExportError::Halted {
            offset: 200,
            checkpoint: CheckpointDisposition::Preserved,
            ..
        }
    ));
    // Rejections are not retried
    assert_eq!(library.calls(), 3);

    // A fresh credential for the same key resumes the same export
    let renewed = Credential::new("renewed-token", None, fingerprint());
    let summary = executor.execute(&job, &renewed).await.unwrap();
    assert!(summary.resumed);
    assert_eq!(json_item_ids(&summary.output_path), ids(1..=500));
}

#[tokio::test]
async fn test_concurrent_export_is_refused() {
    let dir = TempDir::new().unwrap();
    let layout = StateLayout::new(dir.path());
    let _held = ExportLock::try_acquire(&layout.locks(), &fingerprint(), ExportMode::Full).unwrap();

    let library = Arc::new(FakeLibrary::with_items(10));
    let executor = ExportExecutor::new(Arc::clone(&library), test_config(100), dir.path()).unwrap();
    let job = ExportJob::new(
        ExportMode::Full,
        OutputFormat::Json,
        dir.path().join("library.json"),
    );
    let error = executor.execute(&job, &credential()).await.unwrap_err();

    assert!(matches!(
        error,
        ExportError::Checkpoint(ResumeError::ExportInProgress { .. })
    ));
    assert_eq!(library.calls(), 0);

    // The other mode has its own lock
    let incremental = ExportJob::new(
        ExportMode::Incremental,
        OutputFormat::Json,
        dir.path().join("delta.json"),
    );
    assert!(executor.execute(&incremental, &credential()).await.is_ok());
}
