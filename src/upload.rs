// Upload staging - place incoming files in the upload directory
//
// Staged files are named `{unix_millis}-{uuid}-{original_name}` and handed
// to the import pipeline, which removes them once processed.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{LedgerError, Result};

/// Name a staged file after the client's file name, stripped of any directory part.
pub fn staged_file_name(original_name: &str) -> Result<String> {
    let name = Path::new(original_name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            LedgerError::InvalidInput(format!("'{}' is not a usable file name", original_name))
        })?;

    Ok(format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        name
    ))
}

/// Fresh path inside `upload_dir` for an incoming upload; the caller writes it.
pub fn staging_path(upload_dir: &Path, original_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(upload_dir)?;
    Ok(upload_dir.join(staged_file_name(original_name)?))
}

/// Copy a local file into `upload_dir` so the original survives the import.
pub fn stage_file(upload_dir: &Path, source: &Path) -> Result<PathBuf> {
    let original_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path = staging_path(upload_dir, &original_name)?;
    fs::copy(source, &path)?;

    tracing::debug!(source = %source.display(), path = %path.display(), "file staged");
    Ok(path)
}

/// Best guess at a media type from the file extension.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => "text/csv",
        "tsv" | "tab" => "text/tab-separated-values",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
