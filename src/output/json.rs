//! JSON output writer
//!
//! Produces a single document:
//!
//! ```text
//! {
//!   "export_date": "2024-05-01T12:00:00+00:00",
//!   "export_type": "full",
//!   "items": [
//!     {...},
//!     {...}
//!   ],
//!   "total_items": 2
//! }
//! ```
//!
//! Items are serialized one per line as they arrive; the closing framing is only written
//! by [`OutputWriter::close`].

use crate::{ExportMode, Item};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    create_partial, finalize_partial, reopen_partial, ItemWriter, OutputCursor, OutputError,
    OutputResult, OutputWriter,
};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Streaming JSON writer for exported items
#[derive(Debug)]
pub struct JsonItemWriter {
    writer: BufWriter<File>,
    target: PathBuf,
    items_written: u64,
    flushed_items: u64,
    flushed_bytes: u64,
}

impl JsonItemWriter {
    /// Start a new JSON export that will end up at `target`
    pub fn create(target: &Path, mode: ExportMode) -> OutputResult<Self> {
        info!(path = %target.display(), mode = %mode, "Creating JSON writer");
        let file = create_partial(target)?;

        let mut writer = Self::wrap(file, target.to_path_buf(), 0);
        let export_date = chrono::Utc::now().to_rfc3339();
        let header = format!(
            "{{\n  \"export_date\": {},\n  \"export_type\": \"{}\",\n  \"items\": [\n",
            serde_json::Value::String(export_date),
            mode.as_str()
        );
        writer.write_raw(header.as_bytes())?;
        writer.flush()?;
        Ok(writer)
    }

    /// Continue a suspended JSON export
    pub fn resume(cursor: &OutputCursor) -> OutputResult<Self> {
        let file = reopen_partial(cursor)?;
        info!(
            path = %cursor.path.display(),
            items = cursor.items,
            bytes = cursor.bytes,
            "Resuming JSON writer"
        );
        let mut writer = Self::wrap(file, cursor.path.clone(), cursor.items);
        writer.flushed_bytes = cursor.bytes;
        Ok(writer)
    }

    fn wrap(file: File, target: PathBuf, items: u64) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file),
            target,
            items_written: items,
            flushed_items: items,
            flushed_bytes: 0,
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> OutputResult<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| OutputError::IoError(format!("Failed to write: {e}")))
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

impl ItemWriter for JsonItemWriter {
    fn write_item(&mut self, item: &Item) -> OutputResult<()> {
        let encoded = serde_json::to_string(item).map_err(|e| {
            OutputError::SerializationError(format!(
                "Failed to encode item {}: {e}",
                item.item_id
            ))
        })?;

        let separator: &[u8] = if self.items_written > 0 { b",\n    " } else { b"    " };
        self.write_raw(separator)?;
        self.write_raw(encoded.as_bytes())?;
        self.items_written += 1;
        Ok(())
    }
}

impl OutputWriter for JsonItemWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))?;

        let file = self.writer.get_ref();
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
        debug!(items = self.items_written, "Closing JSON writer");
        let footer = format!("\n  ],\n  \"total_items\": {}\n}}\n", self.items_written);
        self.write_raw(footer.as_bytes())?;
        self.flush()?;

        let file = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {e}")))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))?;
        drop(file);

        finalize_partial(&self.target)?;
        info!(
            path = %self.target.display(),
            items = self.items_written,
            "JSON export written"
        );
        Ok(self.target)
    }

    fn suspend(mut self) -> OutputResult<()> {
        self.flush()?;
        debug!(
            path = %self.target.display(),
            items = self.flushed_items,
            "JSON writer suspended"
        );
        Ok(())
    }
}
