//! Resolver double shared by the unit tests.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::resolver::{DownloadJob, MediaMetadata, MediaResolver, ResolverError};

/// Replaces the `%(ext)s` placeholder the way yt-dlp would.
pub fn expand_template(template: &str, extension: &str) -> PathBuf {
    PathBuf::from(template.replace("%(ext)s", extension))
}

/// Writes `{template with ext}` on download and optionally reports it.
pub struct StubResolver {
    pub title: Option<String>,
    pub written_ext: &'static str,
    pub report_path: bool,
    pub fail_metadata: bool,
    pub fail_download: bool,
    pub metadata_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
}

impl StubResolver {
    pub fn titled(title: &str, written_ext: &'static str) -> Self {
        Self {
            title: Some(title.to_string()),
            written_ext,
            report_path: true,
            fail_metadata: false,
            fail_download: false,
            metadata_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaResolver for StubResolver {
    async fn resolve_metadata(&self, _url: &str) -> Result<MediaMetadata, ResolverError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata {
            return Err(ResolverError::Failed(
                "ERROR: Unsupported URL: https://nope".into(),
            ));
        }
        Ok(MediaMetadata {
            title: self.title.clone(),
            ..MediaMetadata::default()
        })
    }

    async fn download(&self, job: DownloadJob<'_>) -> Result<Option<PathBuf>, ResolverError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_download {
            return Err(ResolverError::Failed("ERROR: ffmpeg not found".into()));
        }
        let path = expand_template(job.output_template, self.written_ext);
        tokio::fs::write(&path, b"media").await.unwrap();
        Ok(self.report_path.then_some(path))
    }
}

#[test]
fn template_expansion_replaces_extension() {
    assert_eq!(
        expand_template("/tmp/d/a_audio.%(ext)s", "mp3"),
        PathBuf::from("/tmp/d/a_audio.mp3")
    );
}
