//! In-memory stand-ins for the remote service shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pocket_export::auth::{AccessGrant, AuthorizationApi, ConsentPrompt, Credential};
use pocket_export::exporter::ExportConfig;
use pocket_export::fetcher::{Batch, BatchRequest, FetcherError, FetcherResult, ItemFetcher};
use pocket_export::{Fingerprint, Item, ItemStatus};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const CONSUMER_KEY: &str = "12345-abcdef0123456789";

/// Unix time the fake library's items were last touched, before any test runs
pub const LIBRARY_EPOCH: i64 = 1_700_000_000;

pub fn fingerprint() -> Fingerprint {
    Fingerprint::from_consumer_key(CONSUMER_KEY)
}

pub fn credential() -> Credential {
    Credential::new("access-token", Some("reader".to_string()), fingerprint())
}

/// Fast, deterministic configuration for loop tests
pub fn test_config(batch_size: u32) -> ExportConfig {
    let mut config = ExportConfig::default().with_batch_size(batch_size);
    config.base_delay = 0.01;
    config.max_delay = 0.05;
    config.max_retries = 3;
    config.checkpoint_interval = 100;
    config
}

pub fn item(id: u64, updated: i64) -> Item {
    let stamp = |secs: i64| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    };
    Item {
        item_id: id.to_string(),
        resolved_id: id.to_string(),
        given_url: format!("https://example.com/articles/{id}"),
        resolved_url: format!("https://example.com/articles/{id}"),
        given_title: format!("Article {id}"),
        resolved_title: format!("Article {id}"),
        excerpt: "An excerpt, with a comma".to_string(),
        is_article: true,
        is_index: false,
        has_video: false,
        has_image: id % 2 == 0,
        word_count: 100 + id,
        lang: "en".to_string(),
        time_added: stamp(LIBRARY_EPOCH - 1000),
        time_updated: stamp(updated),
        time_read: None,
        time_favorited: None,
        status: ItemStatus::Unread,
        favorite: id % 7 == 0,
        tags: vec!["rust".to_string()],
        authors: Vec::new(),
        images: Vec::new(),
        videos: Vec::new(),
    }
}

/// A remote library held in memory
///
/// Pages are cut from the items modified at or after `since`, in insertion order, the way
/// the remote pages a stable sort. Failures are scripted per call index, counting every
/// attempt including retries.
#[derive(Default)]
pub struct FakeLibrary {
    items: Mutex<Vec<(Item, i64)>>,
    failures: Mutex<HashMap<usize, FetcherError>>,
    requests: Mutex<Vec<BatchRequest>>,
    calls: AtomicUsize,
}

impl FakeLibrary {
    pub fn with_items(count: u64) -> Self {
        let library = Self::default();
        for id in 1..=count {
            library.push(item(id, LIBRARY_EPOCH + id as i64), LIBRARY_EPOCH + id as i64);
        }
        library
    }

    pub fn push(&self, item: Item, updated: i64) {
        self.items.lock().unwrap().push((item, updated));
    }

    /// Mark an item as modified at `updated`
    pub fn touch(&self, id: u64, updated: i64) {
        let mut items = self.items.lock().unwrap();
        if let Some(entry) = items.iter_mut().find(|(item, _)| item.item_id == id.to_string()) {
            entry.1 = updated;
        }
    }

    pub fn fail_on_call(&self, call: usize, error: FetcherError) {
        self.failures.lock().unwrap().insert(call, error);
    }

    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemFetcher for FakeLibrary {
    async fn fetch_batch(
        &self,
        _credential: &Credential,
        request: &BatchRequest,
    ) -> FetcherResult<Batch> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(*request);

        if let Some(error) = self.failures.lock().unwrap().remove(&call) {
            return Err(error);
        }

        let items: Vec<Item> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, updated)| request.since.map_or(true, |since| *updated >= since))
            .skip(request.offset as usize)
            .take(request.count as usize)
            .map(|(item, _)| item.clone())
            .collect();

        Ok(Batch {
            received: items.len(),
            end_of_data: items.is_empty(),
            items,
        })
    }
}

/// Token endpoints that always succeed
#[derive(Default)]
pub struct FakeAuthApi {
    redirect_uris: Mutex<Vec<String>>,
    exchanges: AtomicUsize,
}

impl FakeAuthApi {
    pub fn redirect_uris(&self) -> Vec<String> {
        self.redirect_uris.lock().unwrap().clone()
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationApi for FakeAuthApi {
    async fn request_token(&self, redirect_uri: &str) -> FetcherResult<String> {
        self.redirect_uris
            .lock()
            .unwrap()
            .push(redirect_uri.to_string());
        Ok("request-token".to_string())
    }

    async fn exchange_token(&self, request_token: &str) -> FetcherResult<AccessGrant> {
        assert_eq!(request_token, "request-token");
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(AccessGrant {
            access_token: "fresh-access-token".to_string(),
            username: Some("reader".to_string()),
        })
    }
}

/// Plays the browser: follows the consent page's redirect back to the listener
///
/// `query` is appended to the redirect, e.g. `?error=access_denied`.
pub struct RedirectingPrompt {
    pub query: &'static str,
}

impl ConsentPrompt for RedirectingPrompt {
    fn present(&self, url: &str) {
        let consent = url::Url::parse(url).unwrap();
        let redirect = consent
            .query_pairs()
            .find(|(key, _)| key == "redirect_uri")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        let target = format!("{redirect}{}", self.query);

        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            // A stray request first; the listener must keep waiting for the callback path.
            let base = url::Url::parse(&target).unwrap();
            let _ = client.get(base.join("/favicon.ico").unwrap()).send().await;
            let _ = client.get(&target).send().await;
        });
    }
}

/// A user who never answers
pub struct SilentPrompt;

impl ConsentPrompt for SilentPrompt {
    fn present(&self, _url: &str) {}
}

/// A loopback address with a port nothing is listening on
pub fn free_loopback_addr() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Item ids of a finished JSON export, in file order
pub fn json_item_ids(path: &Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&content).unwrap();
    document["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["item_id"].as_str().unwrap().to_string())
        .collect()
}

pub fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<String> {
    range.map(|id| id.to_string()).collect()
}
