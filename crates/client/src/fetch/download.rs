//! Saving response bodies to the download directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use assetry_core::Error;

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"filename="(.+)""#).unwrap());

/// Extract the quoted `filename` from a `Content-Disposition` value.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    FILENAME_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reduce a suggested name to a single safe path component.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}

/// Write `bytes` to `dir/filename`, creating `dir` if needed.
pub async fn save(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, Error> {
    let name = sanitize_filename(filename)
        .ok_or_else(|| Error::InvalidInput(format!("unusable download filename: {filename:?}")))?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "saved download");
    Ok(path)
}
