use std::{io::ErrorKind, path::PathBuf, process::Output};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Number;
use thiserror::Error;
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::debug;

use crate::formats::{FormatPlan, PostProcessing};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("{0}")]
    Failed(String),

    #[error("resolver timed out after {0} seconds")]
    TimedOut(u64),

    #[error("resolver executable {0:?} is not installed")]
    NotInstalled(String),

    #[error("could not parse resolver output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<Number>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
    pub extractor: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJob<'a> {
    pub url: &'a str,
    pub plan: &'a FormatPlan,
    /// Output template; `%(ext)s` is replaced by the resolver.
    pub output_template: &'a str,
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Fetches metadata only. Must not write anything to disk.
    async fn resolve_metadata(&self, url: &str) -> Result<MediaMetadata, ResolverError>;

    /// Downloads and post-processes the media. Returns the final path when
    /// the resolver reports one.
    async fn download(&self, job: DownloadJob<'_>) -> Result<Option<PathBuf>, ResolverError>;
}

#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    timeout: Option<Duration>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ResolverError> {
        debug!("Running {} {:?}", self.binary, args);
        let command_future = Command::new(&self.binary).args(args).output();
        let result = match self.timeout {
            Some(limit) => timeout(limit, command_future)
                .await
                .map_err(|_| ResolverError::TimedOut(limit.as_secs()))?,
            None => command_future.await,
        };

        let output = result.map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ResolverError::NotInstalled(self.binary.clone())
            } else {
                ResolverError::Failed(format!("could not run {}: {error}", self.binary))
            }
        })?;

        if !output.status.success() {
            return Err(ResolverError::Failed(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve_metadata(&self, url: &str) -> Result<MediaMetadata, ResolverError> {
        let output = self
            .run(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                "--".to_string(),
                url.to_string(),
            ])
            .await?;

        serde_json::from_slice(&output.stdout)
            .map_err(|error| ResolverError::InvalidOutput(error.to_string()))
    }

    async fn download(&self, job: DownloadJob<'_>) -> Result<Option<PathBuf>, ResolverError> {
        let output = self.run(download_args(&job)).await?;
        Ok(extract_printed_path(&output.stdout).map(PathBuf::from))
    }
}

fn download_args(job: &DownloadJob<'_>) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        // The janitor ages files by mtime, so it must be the download time.
        "--no-mtime".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        job.output_template.to_string(),
        "-f".to_string(),
        job.plan.selector.clone(),
    ];

    match &job.plan.post_processing {
        PostProcessing::ExtractAudio { codec, bitrate } => {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(codec.to_string());
            args.push("--audio-quality".to_string());
            args.push(bitrate.clone());
        }
        PostProcessing::MergeInto { container } => {
            args.push("--merge-output-format".to_string());
            args.push(container.to_string());
        }
    }

    args.push("--".to_string());
    args.push(job.url.to_string());
    args
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        format!("Unsupported or invalid URL ({message})")
    } else {
        message
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
