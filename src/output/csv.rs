//! CSV output writer
//!
//! One row per item. List fields are joined with `", "` and videos are embedded as a JSON
//! array. The header row is written when the file is created, so an export with no items
//! still yields a valid CSV file.

use crate::Item;
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    create_partial, finalize_partial, reopen_partial, ItemWriter, OutputCursor, OutputError,
    OutputResult, OutputWriter,
};

const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Column order of the CSV output
pub const CSV_HEADER: [&str; 23] = [
    "item_id",
    "resolved_id",
    "given_url",
    "resolved_url",
    "given_title",
    "resolved_title",
    "excerpt",
    "is_article",
    "is_index",
    "has_video",
    "has_image",
    "word_count",
    "lang",
    "time_added",
    "time_updated",
    "time_read",
    "time_favorited",
    "status",
    "favorite",
    "tags",
    "authors",
    "images",
    "videos",
];

/// Flattened CSV row for an item
#[derive(Debug, Serialize)]
struct ItemRecord<'a> {
    item_id: &'a str,
    resolved_id: &'a str,
    given_url: &'a str,
    resolved_url: &'a str,
    given_title: &'a str,
    resolved_title: &'a str,
    excerpt: &'a str,
    is_article: bool,
    is_index: bool,
    has_video: bool,
    has_image: bool,
    word_count: u64,
    lang: &'a str,
    time_added: Option<&'a str>,
    time_updated: Option<&'a str>,
    time_read: Option<&'a str>,
    time_favorited: Option<&'a str>,
    status: &'static str,
    favorite: bool,
    tags: String,
    authors: String,
    images: String,
    videos: String,
}

impl<'a> ItemRecord<'a> {
    fn try_from_item(item: &'a Item) -> OutputResult<Self> {
        let videos = if item.videos.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&item.videos).map_err(|e| {
                OutputError::SerializationError(format!(
                    "Failed to encode videos of item {}: {e}",
                    item.item_id
                ))
            })?
        };

        Ok(Self {
            item_id: &item.item_id,
            resolved_id: &item.resolved_id,
            given_url: &item.given_url,
            resolved_url: &item.resolved_url,
            given_title: &item.given_title,
            resolved_title: &item.resolved_title,
            excerpt: &item.excerpt,
            is_article: item.is_article,
            is_index: item.is_index,
            has_video: item.has_video,
            has_image: item.has_image,
            word_count: item.word_count,
            lang: &item.lang,
            time_added: item.time_added.as_deref(),
            time_updated: item.time_updated.as_deref(),
            time_read: item.time_read.as_deref(),
            time_favorited: item.time_favorited.as_deref(),
            status: item.status.as_str(),
            favorite: item.favorite,
            tags: item.tags.join(", "),
            authors: item.authors.join(", "),
            images: item.images.join(", "),
            videos,
        })
    }
}

/// Streaming CSV writer for exported items
#[derive(Debug)]
pub struct CsvItemWriter {
    writer: Writer<BufWriter<File>>,
    target: PathBuf,
    items_written: u64,
    flushed_items: u64,
    flushed_bytes: u64,
}

impl CsvItemWriter {
    /// Start a new CSV export that will end up at `target`
    pub fn create(target: &Path) -> OutputResult<Self> {
        info!(path = %target.display(), "Creating CSV writer");
        let file = create_partial(target)?;

        let mut writer = Self::wrap(file, target.to_path_buf(), 0);
        writer
            .writer
            .write_record(CSV_HEADER)
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;
        writer.flush()?;
        Ok(writer)
    }

    /// Continue a suspended CSV export
    pub fn resume(cursor: &OutputCursor) -> OutputResult<Self> {
        let file = reopen_partial(cursor)?;
        info!(
            path = %cursor.path.display(),
            items = cursor.items,
            bytes = cursor.bytes,
            "Resuming CSV writer"
        );
        let mut writer = Self::wrap(file, cursor.path.clone(), cursor.items);
        writer.flushed_bytes = cursor.bytes;
        Ok(writer)
    }

    fn wrap(file: File, target: PathBuf, items: u64) -> Self {
        let writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));
        Self {
            writer,
            target,
            items_written: items,
            flushed_items: items,
            flushed_bytes: 0,
        }
    }

    /// Final output path
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Items covered by the last flush
    pub fn flushed_items(&self) -> u64 {
        self.flushed_items
    }
}

impl ItemWriter for CsvItemWriter {
    fn write_item(&mut self, item: &Item) -> OutputResult<()> {
        let record = ItemRecord::try_from_item(item)?;
        self.writer
            .serialize(&record)
            .map_err(|e| OutputError::CsvError(format!("Failed to write item: {e}")))?;
        self.items_written += 1;
        Ok(())
    }
}

impl OutputWriter for CsvItemWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))?;

        let file = self.writer.get_ref().get_ref();
        file.sync_data()
            .map_err(|e| OutputError::FlushError(format!("Failed to sync file: {e}")))?;
        self.flushed_bytes = file
            .metadata()
            .map_err(|e| OutputError::IoError(format!("Failed to stat file: {e}")))?
            .len();
        self.flushed_items = self.items_written;
        Ok(())
    }

    fn flushed_bytes(&self) -> u64 {
        self.flushed_bytes
    }

    fn items_written(&self) -> u64 {
        self.items_written
    }

    fn close(mut self) -> OutputResult<PathBuf> {
        debug!(items = self.items_written, "Closing CSV writer");
        self.flush()?;

        let buf_writer = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {e}")))?;
        let file = buf_writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;
        drop(file);

        finalize_partial(&self.target)?;
        info!(
            path = %self.target.display(),
            items = self.items_written,
            "CSV export written"
        );
        Ok(self.target)
    }

    fn suspend(mut self) -> OutputResult<()> {
        self.flush()?;
        debug!(
            path = %self.target.display(),
            items = self.flushed_items,
            "CSV writer suspended"
        );
        Ok(())
    }
}
