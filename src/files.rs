use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use tracing::warn;

use crate::error::ServiceError;

#[derive(Debug)]
pub struct CachedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

pub async fn open_cached_file(
    download_dir: &Path,
    filename: &str,
) -> Result<CachedFile, ServiceError> {
    let not_found = || ServiceError::NotFound("File not found".to_string());

    if !is_single_segment(filename) {
        warn!("Rejected cache file request {:?}", filename);
        return Err(not_found());
    }

    let canonical_dir = tokio::fs::canonicalize(download_dir)
        .await
        .map_err(|_| not_found())?;
    let candidate = download_dir.join(filename);
    let canonical = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(error) => {
            warn!("Could not resolve {:?}: {error}", candidate);
            return Err(not_found());
        }
    };

    if !canonical.starts_with(&canonical_dir) {
        warn!("Blocked cache file outside the download directory: {:?}", canonical);
        return Err(not_found());
    }

    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    Ok(CachedFile {
        path: canonical,
        filename: filename.to_string(),
        size: metadata.len(),
    })
}

fn is_single_segment(value: &str) -> bool {
    if value.is_empty() || value.contains(['/', '\\', '\0']) {
        return false;
    }

    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
