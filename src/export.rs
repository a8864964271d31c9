//! JSON export of detection records
//!
//! Writes one pretty-printed JSON array of detection records for audit.
//! The file is never read back.

use crate::error::{Result, SentinelError};
use crate::types::DetectionRecord;
use std::path::{Path, PathBuf};

/// Detection export file
///
/// Writes are atomic: the array goes to a temp file which is then renamed
/// over the target.
pub struct DetectionExport {
    path: PathBuf,
}

impl DetectionExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the export with `records`
    pub fn write(&self, records: &[DetectionRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SentinelError::Config(format!(
                    "Failed to create export directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            SentinelError::Config(format!(
                "Failed to rename export file {} to {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::info!(path = %self.path.display(), records = records.len(), "Detections exported");
        Ok(())
    }
}
