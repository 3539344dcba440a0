//! HTTP client for the Pocket v3 API
//!
//! Every endpoint is a JSON `POST` with `X-Accept: application/json`. The client performs
//! exactly one request per call; retries and quota live in the exporter so that every
//! attempt is counted against the local rate windows.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::pocket_parser::parse_get_response;
use super::{Batch, BatchRequest, FetcherError, FetcherResult, ItemFetcher};
use crate::auth::{AccessGrant, AuthorizationApi, Credential};
use crate::exporter::ExportConfig;
use crate::metrics::RequestMetrics;

/// Remote error detail
const X_ERROR: &str = "X-Error";
/// Requests left for this user in the current hour
const X_LIMIT_USER_REMAINING: &str = "X-Limit-User-Remaining";
/// Seconds until the user limit resets
const X_LIMIT_USER_RESET: &str = "X-Limit-User-Reset";
/// Requests left for this consumer key today
const X_LIMIT_KEY_REMAINING: &str = "X-Limit-Key-Remaining";

/// Pocket API client
#[derive(Debug, Clone)]
pub struct PocketHttpClient {
    client: Client,
    base_url: String,
    consumer_key: String,
}

impl PocketHttpClient {
    /// Create a client using the configured base URL and request timeout
    pub fn new(consumer_key: impl Into<String>, config: &ExportConfig) -> FetcherResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("pocket-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetcherError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.api_base_url, consumer_key))
    }

    /// Create a client around an existing reqwest client
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        consumer_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            consumer_key: consumer_key.into(),
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and return the parsed JSON response
    async fn post(&self, endpoint: &'static str, body: &Value) -> FetcherResult<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let metrics = RequestMetrics::start(endpoint);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let err = map_transport_error(&e);
                metrics.record_failure(err.description());
                err
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.map_err(|e| {
            let err = FetcherError::BodyError(e.to_string());
            metrics.record_failure(err.description());
            err
        })?;

        if !status.is_success() {
            let err = classify_response(status, &headers, &text);
            metrics.record_failure(err.description());
            return Err(err);
        }

        let value = serde_json::from_str(&text).map_err(|e| {
            FetcherError::ParseError(format!("invalid JSON from {endpoint}: {e}"))
        })?;
        metrics.record_success();
        Ok(value)
    }
}

#[async_trait]
impl ItemFetcher for PocketHttpClient {
    async fn fetch_batch(
        &self,
        credential: &Credential,
        request: &BatchRequest,
    ) -> FetcherResult<Batch> {
        let mut body = json!({
            "consumer_key": self.consumer_key,
            "access_token": credential.access_token(),
            "detailType": "complete",
            "state": "all",
            "sort": "oldest",
            "count": request.count,
            "offset": request.offset,
        });
        if let Some(since) = request.since {
            body["since"] = json!(since);
        }

        let response = self.post("/get", &body).await?;
        let batch = parse_get_response(&response)?;
        debug!(
            offset = request.offset,
            received = batch.received,
            parsed = batch.items.len(),
            end_of_data = batch.end_of_data,
            "Fetched page"
        );
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
struct RequestTokenResponse {
    code: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    access_token: String,
    #[serde(default)]
    username: Option<String>,
}

#[async_trait]
impl AuthorizationApi for PocketHttpClient {
    async fn request_token(&self, redirect_uri: &str) -> FetcherResult<String> {
        let body = json!({
            "consumer_key": self.consumer_key,
            "redirect_uri": redirect_uri,
        });
        let response = self.post("/oauth/request", &body).await?;
        let parsed: RequestTokenResponse = serde_json::from_value(response)
            .map_err(|e| FetcherError::ParseError(format!("invalid request token response: {e}")))?;
        Ok(parsed.code)
    }

    async fn exchange_token(&self, request_token: &str) -> FetcherResult<AccessGrant> {
        let body = json!({
            "consumer_key": self.consumer_key,
            "code": request_token,
        });
        let response = self.post("/oauth/authorize", &body).await?;
        let parsed: AuthorizeResponse = serde_json::from_value(response)
            .map_err(|e| FetcherError::ParseError(format!("invalid authorize response: {e}")))?;
        Ok(AccessGrant {
            access_token: parsed.access_token,
            username: parsed.username,
        })
    }
}

fn map_transport_error(error: &reqwest::Error) -> FetcherError {
    if error.is_timeout() {
        FetcherError::NetworkTimeout(error.to_string())
    } else {
        FetcherError::NetworkError(error.to_string())
    }
}

/// Map a non-success response to a classified error
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> FetcherError {
    let detail = header_str(headers, X_ERROR)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        });

    match status.as_u16() {
        401 => FetcherError::CredentialRejected(detail),
        429 => FetcherError::RateLimited {
            retry_after: retry_after(headers),
            message: detail,
        },
        403 if header_u64(headers, X_LIMIT_KEY_REMAINING) == Some(0) => {
            FetcherError::QuotaExhausted(detail)
        }
        403 if header_u64(headers, X_LIMIT_USER_REMAINING) == Some(0) => {
            FetcherError::RateLimited {
                retry_after: retry_after(headers),
                message: detail,
            }
        }
        403 => FetcherError::Forbidden(detail),
        code if status.is_server_error() => FetcherError::ServerError {
            status: code,
            retry_after: retry_after_header(headers),
            message: detail,
        },
        code => FetcherError::ClientError {
            status: code,
            message: detail,
        },
    }
}

/// `Retry-After` (seconds or HTTP date), falling back to the user-limit reset
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    retry_after_header(headers)
        .or_else(|| header_u64(headers, X_LIMIT_USER_RESET).map(Duration::from_secs))
}

/// `Retry-After` alone, as delay seconds or an HTTP date; past dates mean no wait
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = header_str(headers, RETRY_AFTER.as_str())?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let secs = (date.timestamp() - chrono::Utc::now().timestamp()).max(0) as u64;
    Some(Duration::from_secs(secs))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|v| v.trim().parse().ok())
}
