use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::ServiceError,
    formats::{DEFAULT_QUALITY, DownloadKind, select_format},
    inflight::InFlight,
    resolver::{DownloadJob, MediaResolver},
    sanitize::sanitize_title,
};

const TEMP_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "format")]
    pub kind: DownloadKind,
    #[serde(default = "default_quality")]
    pub quality: String,
}

fn default_quality() -> String {
    DEFAULT_QUALITY.to_string()
}

#[derive(Debug, Clone)]
pub struct DownloadArtifact {
    pub filename_base: String,
    pub final_extension: String,
    pub resolved_path: PathBuf,
    pub filename: String,
}

impl DownloadArtifact {
    pub fn download_url(&self) -> String {
        format!("/api/file/{}", self.filename)
    }
}

#[derive(Clone)]
pub struct Downloader {
    resolver: Arc<dyn MediaResolver>,
    download_dir: PathBuf,
    inflight: InFlight,
}

impl Downloader {
    pub fn new(resolver: Arc<dyn MediaResolver>, download_dir: PathBuf) -> Self {
        Self {
            resolver,
            download_dir,
            inflight: InFlight::default(),
        }
    }

    pub fn resolver(&self) -> &dyn MediaResolver {
        self.resolver.as_ref()
    }

    pub async fn download(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadArtifact, ServiceError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(ServiceError::missing_url());
        }

        let plan = select_format(request.kind, &request.quality)?;

        let metadata = self
            .resolver
            .resolve_metadata(url)
            .await
            .map_err(ServiceError::resolution)?;
        let title = sanitize_title(metadata.title.as_deref().unwrap_or_default());
        let filename_base = format!("{title}_{}", plan.filename_suffix);

        let _slot = self.inflight.acquire(&filename_base).await;

        let template = self.download_dir.join(format!("{filename_base}.%(ext)s"));
        let template = template.to_string_lossy();
        info!("Downloading {:?} as {}", url, filename_base);

        let reported = self
            .resolver
            .download(DownloadJob {
                url,
                plan: &plan,
                output_template: &template,
            })
            .await
            .map_err(|error| {
                warn!("Download of {:?} failed: {error}", url);
                ServiceError::download(error)
            })?;

        let resolved_path = locate_artifact(
            &self.download_dir,
            &filename_base,
            plan.final_extension,
            reported.as_deref(),
        )
        .await?;

        let filename = resolved_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                ServiceError::DownloadFailed("downloaded file has an unreadable name".to_string())
            })?;
        let final_extension = Path::new(&filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(plan.final_extension)
            .to_string();

        info!("Download ready: {}", filename);
        Ok(DownloadArtifact {
            filename_base,
            final_extension,
            resolved_path,
            filename,
        })
    }
}

/// Reported path first, then `{base}.{ext}`, then a prefix scan.
pub async fn locate_artifact(
    download_dir: &Path,
    filename_base: &str,
    final_extension: &str,
    reported: Option<&Path>,
) -> Result<PathBuf, ServiceError> {
    let canonical_dir = tokio::fs::canonicalize(download_dir)
        .await
        .map_err(|error| {
            ServiceError::DownloadFailed(format!("could not open download directory: {error}"))
        })?;

    if let Some(path) = reported {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            download_dir.join(path)
        };
        if let Some(valid) = artifact_candidate(&canonical_dir, &candidate, filename_base).await? {
            return Ok(valid);
        }
        warn!(
            "Resolver reported {:?}, which is not a usable artifact for {}",
            path, filename_base
        );
    }

    let expected = download_dir.join(format!("{filename_base}.{final_extension}"));
    if let Some(valid) = artifact_candidate(&canonical_dir, &expected, filename_base).await? {
        return Ok(valid);
    }

    let mut entries = tokio::fs::read_dir(download_dir).await.map_err(|error| {
        ServiceError::DownloadFailed(format!("could not read download directory: {error}"))
    })?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|error| {
        ServiceError::DownloadFailed(format!("could not read download directory: {error}"))
    })? {
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str()
            && name.starts_with(filename_base)
            && !TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        {
            names.push(name.to_string());
        }
    }
    names.sort();

    for name in names {
        let candidate = download_dir.join(&name);
        if let Some(valid) = artifact_candidate(&canonical_dir, &candidate, filename_base).await? {
            warn!(
                "Expected {}.{} but found {}",
                filename_base, final_extension, name
            );
            return Ok(valid);
        }
    }

    Err(ServiceError::DownloadFailed(format!(
        "no downloaded file found for {filename_base}"
    )))
}

async fn artifact_candidate(
    canonical_dir: &Path,
    candidate: &Path,
    filename_base: &str,
) -> Result<Option<PathBuf>, ServiceError> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ServiceError::DownloadFailed(format!(
                "could not inspect downloaded file: {error}"
            )));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical = tokio::fs::canonicalize(candidate).await.map_err(|error| {
        ServiceError::DownloadFailed(format!("could not resolve downloaded file: {error}"))
    })?;

    let inside = canonical.parent() == Some(canonical_dir);
    let named = canonical
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(filename_base));
    if !inside || !named {
        warn!("Ignoring file outside the download directory: {:?}", canonical);
        return Ok(None);
    }

    Ok(Some(canonical))
}
