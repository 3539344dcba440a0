//! Output file naming

use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::OutputFormat;
use crate::ExportMode;

/// Default output file name for an export started at `now`
///
/// `pocket_export_20240501_120000.json` for full exports,
/// `pocket_export_incremental_20240501_120000.csv` for incremental ones.
pub fn default_output_path(format: OutputFormat, mode: ExportMode, now: DateTime<Local>) -> PathBuf {
    let suffix = match mode {
        ExportMode::Full => "",
        ExportMode::Incremental => "_incremental",
    };
    PathBuf::from(format!(
        "pocket_export{suffix}_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}

/// In-progress file for `target`: `<target>.partial`
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}
