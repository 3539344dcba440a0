//! Streaming export sinks
//!
//! Writers accept one [`Item`] at a time and keep memory flat. Output goes to a
//! `<target>.partial` file; [`OutputWriter::close`] finalizes it and renames it over the
//! target, while [`OutputWriter::suspend`] leaves it in place so a resumed run can truncate
//! it to the last checkpointed length and keep appending. Both consume the writer, so a
//! sink is closed exactly once.
//!
//! Writers do not deduplicate; resuming from a checkpoint truncates back to the flushed
//! position instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{ExportMode, Item};

pub mod csv;
pub mod json;
pub mod path;

pub use self::csv::CsvItemWriter;
pub use self::json::JsonItemWriter;
pub use self::path::{default_output_path, partial_path};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// The partial file no longer matches the checkpoint
    #[error("cannot resume {path}: {reason}")]
    ResumeMismatch {
        /// Partial output file
        path: PathBuf,
        /// What does not match
        reason: String,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON document with an `items` array
    Json,
    /// One flattened row per item
    Csv,
}

impl OutputFormat {
    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Invalid format: {s}. Valid options: json, csv")),
        }
    }
}

/// Where a suspended sink stopped, recorded in the checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCursor {
    /// Final output path
    pub path: PathBuf,
    /// Output format
    pub format: OutputFormat,
    /// Bytes of the partial file covered by the checkpoint
    pub bytes: u64,
    /// Items contained in those bytes
    pub items: u64,
}

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush buffered data and sync it to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Bytes durably written as of the last flush
    fn flushed_bytes(&self) -> u64;

    /// Items written so far, including ones not yet flushed
    fn items_written(&self) -> u64;

    /// Finalize the document and move it to the target path
    fn close(self) -> OutputResult<PathBuf>;

    /// Flush and keep the partial file for a later resume
    fn suspend(self) -> OutputResult<()>;
}

/// Trait for writing exported items
pub trait ItemWriter: OutputWriter {
    /// Write a single item
    fn write_item(&mut self, item: &Item) -> OutputResult<()>;

    /// Write multiple items at once
    fn write_items(&mut self, items: &[Item]) -> OutputResult<()> {
        for item in items {
            self.write_item(item)?;
        }
        Ok(())
    }
}

/// Format-dispatching sink used by the fetch loop
#[derive(Debug)]
pub enum SinkWriter {
    /// JSON document
    Json(JsonItemWriter),
    /// CSV rows
    Csv(CsvItemWriter),
}

impl SinkWriter {
    /// Start a fresh export at `target`, discarding any previous partial file
    pub fn create(target: &Path, format: OutputFormat, mode: ExportMode) -> OutputResult<Self> {
        Ok(match format {
            OutputFormat::Json => SinkWriter::Json(JsonItemWriter::create(target, mode)?),
            OutputFormat::Csv => SinkWriter::Csv(CsvItemWriter::create(target)?),
        })
    }

    /// Continue a suspended export from `cursor`
    pub fn resume(cursor: &OutputCursor) -> OutputResult<Self> {
        Ok(match cursor.format {
            OutputFormat::Json => SinkWriter::Json(JsonItemWriter::resume(cursor)?),
            OutputFormat::Csv => SinkWriter::Csv(CsvItemWriter::resume(cursor)?),
        })
    }

    /// Output format
    pub fn format(&self) -> OutputFormat {
        match self {
            SinkWriter::Json(_) => OutputFormat::Json,
            SinkWriter::Csv(_) => OutputFormat::Csv,
        }
    }

    /// Final output path
    pub fn target(&self) -> &Path {
        match self {
            SinkWriter::Json(writer) => writer.target(),
            SinkWriter::Csv(writer) => writer.target(),
        }
    }

    /// Cursor describing the flushed state, for checkpoints
    pub fn cursor(&self) -> OutputCursor {
        OutputCursor {
            path: self.target().to_path_buf(),
            format: self.format(),
            bytes: self.flushed_bytes(),
            items: self.flushed_items(),
        }
    }

    fn flushed_items(&self) -> u64 {
        match self {
            SinkWriter::Json(writer) => writer.flushed_items(),
            SinkWriter::Csv(writer) => writer.flushed_items(),
        }
    }
}

impl OutputWriter for SinkWriter {
    fn flush(&mut self) -> OutputResult<()> {
        match self {
            SinkWriter::Json(writer) => writer.flush(),
            SinkWriter::Csv(writer) => writer.flush(),
        }
    }

    fn flushed_bytes(&self) -> u64 {
        match self {
            SinkWriter::Json(writer) => writer.flushed_bytes(),
            SinkWriter::Csv(writer) => writer.flushed_bytes(),
        }
    }

    fn items_written(&self) -> u64 {
        match self {
            SinkWriter::Json(writer) => writer.items_written(),
            SinkWriter::Csv(writer) => writer.items_written(),
        }
    }

    fn close(self) -> OutputResult<PathBuf> {
        match self {
            SinkWriter::Json(writer) => writer.close(),
            SinkWriter::Csv(writer) => writer.close(),
        }
    }

    fn suspend(self) -> OutputResult<()> {
        match self {
            SinkWriter::Json(writer) => writer.suspend(),
            SinkWriter::Csv(writer) => writer.suspend(),
        }
    }
}

impl ItemWriter for SinkWriter {
    fn write_item(&mut self, item: &Item) -> OutputResult<()> {
        match self {
            SinkWriter::Json(writer) => writer.write_item(item),
            SinkWriter::Csv(writer) => writer.write_item(item),
        }
    }
}

/// Open the partial file of a suspended export and truncate it to the cursor
pub(crate) fn reopen_partial(cursor: &OutputCursor) -> OutputResult<std::fs::File> {
    use std::io::{Seek, SeekFrom};

    let partial = partial_path(&cursor.path);
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&partial)
        .map_err(|e| OutputError::ResumeMismatch {
            path: partial.clone(),
            reason: format!("partial file unavailable: {e}"),
        })?;

    let len = file
        .metadata()
        .map_err(|e| OutputError::IoError(format!("Failed to stat partial file: {e}")))?
        .len();
    if len < cursor.bytes {
        return Err(OutputError::ResumeMismatch {
            path: partial,
            reason: format!("file has {len} bytes, checkpoint expects {}", cursor.bytes),
        });
    }

    // Drop whatever was written after the checkpoint
    file.set_len(cursor.bytes)
        .map_err(|e| OutputError::IoError(format!("Failed to truncate partial file: {e}")))?;
    file.seek(SeekFrom::End(0))
        .map_err(|e| OutputError::IoError(format!("Failed to seek partial file: {e}")))?;
    Ok(file)
}

/// Move a finished partial file over the target and make the rename durable
pub(crate) fn finalize_partial(target: &Path) -> OutputResult<()> {
    let partial = partial_path(target);
    std::fs::rename(&partial, target).map_err(|e| {
        OutputError::IoError(format!(
            "Failed to move {} to {}: {e}",
            partial.display(),
            target.display()
        ))
    })?;
    if let Some(parent) = target.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Create (or truncate) the partial file for a fresh export
pub(crate) fn create_partial(target: &Path) -> OutputResult<std::fs::File> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {e}")))?;
        }
    }
    std::fs::File::create(partial_path(target))
        .map_err(|e| OutputError::IoError(format!("Failed to create file: {e}")))
}
