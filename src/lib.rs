//! # Pocket Export Library
//!
//! A resilient synchronization engine that exports a Pocket read-later library to local
//! JSON or CSV files through the paginated, rate-limited v3 API.
//!
//! ## Features
//!
//! - **Dual-Window Rate Limiting**: Local hourly and daily quotas enforced before every request
//! - **Classified Retries**: Transient failures back off exponentially, fatal ones abort at once
//! - **Resume Capability**: Durable checkpoints let an interrupted export continue where it stopped
//! - **Incremental Exports**: Only items modified since the last completed export are fetched
//! - **Streaming Output**: Items are written one at a time, memory stays flat for any library size
//!
//! ## Quick Start
//!
//! ```no_run
//! use pocket_export::auth::Credential;
//! use pocket_export::exporter::{ExportConfig, ExportExecutor, ExportJob};
//! use pocket_export::fetcher::pocket_http::PocketHttpClient;
//! use pocket_export::output::OutputFormat;
//! use pocket_export::{ExportMode, Fingerprint};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExportConfig::default();
//! let fingerprint = Fingerprint::from_consumer_key("my-consumer-key");
//! let credential = Credential::new("access-token", None, fingerprint.clone());
//! let client = PocketHttpClient::new("my-consumer-key", &config)?;
//!
//! let job = ExportJob::new(ExportMode::Full, OutputFormat::Json, "./pocket.json".into());
//! let executor = ExportExecutor::new(client, config, "./state")?;
//! let summary = executor.execute(&job, &credential).await?;
//! println!("exported {} items", summary.items_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`auth`] - Browser consent handshake with a local callback listener, credential storage
//! - [`fetcher`] - Remote API client and response parsing
//! - [`exporter`] - Rate limiter, retry executor, delta selector and the paginated fetch loop
//! - [`resume`] - Checkpoint and export metadata persistence with atomic writes
//! - [`output`] - Streaming JSON and CSV sinks

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authorization handshake and credential storage
pub mod auth;

/// CLI command implementations
pub mod cli;

/// Export orchestration
pub mod exporter;

/// Remote API access
pub mod fetcher;

/// Identity fingerprints for persisted state
pub mod fingerprint;

/// Prometheus metrics
pub mod metrics;

/// Streaming output writers
pub mod output;

/// Checkpoint and metadata persistence
pub mod resume;

/// Graceful shutdown coordination
pub mod shutdown;

pub use fingerprint::Fingerprint;

/// Export mode: a complete export or a delta since the last completed one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Every item in the library
    Full,
    /// Items modified since the last completed export
    Incremental,
}

impl ExportMode {
    /// Lowercase name used in file names and persisted state
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Full => "full",
            ExportMode::Incremental => "incremental",
        }
    }

    /// All modes, in a stable order
    pub fn all() -> [ExportMode; 2] {
        [ExportMode::Full, ExportMode::Incremental]
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ExportMode::Full),
            "incremental" => Ok(ExportMode::Incremental),
            _ => Err(format!(
                "Invalid export mode: {s}. Valid options: full, incremental"
            )),
        }
    }
}

/// Reading status of a saved item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// In the reading list
    Unread,
    /// Archived after reading
    Archived,
    /// Marked for deletion on the remote side
    Deleted,
    /// Status code not recognised
    Unknown,
}

impl ItemStatus {
    /// Map the remote status code ("0", "1", "2")
    pub fn from_code(code: &str) -> Self {
        match code {
            "0" => ItemStatus::Unread,
            "1" => ItemStatus::Archived,
            "2" => ItemStatus::Deleted,
            _ => ItemStatus::Unknown,
        }
    }

    /// Lowercase label used in exports
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Unread => "unread",
            ItemStatus::Archived => "archived",
            ItemStatus::Deleted => "deleted",
            ItemStatus::Unknown => "unknown",
        }
    }
}

/// A video embedded in a saved item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    /// Video source URL
    pub src: String,
    /// Remote video type code
    #[serde(rename = "type")]
    pub kind: String,
}

/// A saved item, normalised from the remote representation
///
/// Timestamps are RFC 3339 UTC strings, `None` when the remote reports zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Remote identifier, the identity key of a record
    pub item_id: String,
    /// Identifier of the resolved URL
    pub resolved_id: String,
    /// URL as saved by the user
    pub given_url: String,
    /// URL after redirects
    pub resolved_url: String,
    /// Title as saved by the user
    pub given_title: String,
    /// Title extracted from the page
    pub resolved_title: String,
    /// Short excerpt of the content
    pub excerpt: String,
    /// Whether the page was parsed as an article
    pub is_article: bool,
    /// Whether the page is an index page
    pub is_index: bool,
    /// Whether the page has a video
    pub has_video: bool,
    /// Whether the page has an image
    pub has_image: bool,
    /// Word count of the article
    pub word_count: u64,
    /// Detected language
    pub lang: String,
    /// When the item was saved
    pub time_added: Option<String>,
    /// When the item was last changed
    pub time_updated: Option<String>,
    /// When the item was archived
    pub time_read: Option<String>,
    /// When the item was favorited
    pub time_favorited: Option<String>,
    /// Reading status
    pub status: ItemStatus,
    /// Whether the item is a favorite
    pub favorite: bool,
    /// Tag names
    pub tags: Vec<String>,
    /// Author names
    pub authors: Vec<String>,
    /// Image source URLs
    pub images: Vec<String>,
    /// Embedded videos
    pub videos: Vec<Video>,
}

impl Item {
    /// Display title: the resolved title, falling back to the given one
    pub fn title(&self) -> &str {
        if self.resolved_title.is_empty() {
            &self.given_title
        } else {
            &self.resolved_title
        }
    }
}
