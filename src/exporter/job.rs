//! Export job specification

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::output::OutputFormat;
use crate::ExportMode;

/// What to export and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    /// Full or incremental
    pub mode: ExportMode,
    /// Output format
    pub format: OutputFormat,
    /// Output file path
    ///
    /// A run that resumes a checkpoint keeps writing to the file of the run it resumes.
    pub output_path: PathBuf,
}

impl ExportJob {
    /// Create a new export job
    pub fn new(mode: ExportMode, format: OutputFormat, output_path: PathBuf) -> Self {
        Self {
            mode,
            format,
            output_path,
        }
    }

    /// Validate job parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.output_path.as_os_str().is_empty() {
            return Err("output path must not be empty".to_string());
        }
        if self.output_path.is_dir() {
            return Err(format!(
                "output path {} is a directory",
                self.output_path.display()
            ));
        }
        Ok(())
    }
}
