use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub const AUDIO_CODEC: &str = "mp3";
pub const VIDEO_CONTAINER: &str = "mp4";
pub const DEFAULT_QUALITY: &str = "720p";
const BEST_AUDIO_QUALITY: &str = "0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    #[default]
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessing {
    ExtractAudio {
        codec: &'static str,
        bitrate: String,
    },
    MergeInto {
        container: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPlan {
    pub selector: String,
    pub final_extension: &'static str,
    pub post_processing: PostProcessing,
    /// Appended to the sanitized title to build the filename base.
    pub filename_suffix: String,
}

pub fn select_format(kind: DownloadKind, quality: &str) -> Result<FormatPlan, ServiceError> {
    match kind {
        DownloadKind::Audio => Ok(FormatPlan {
            selector: "bestaudio/best".to_string(),
            final_extension: AUDIO_CODEC,
            post_processing: PostProcessing::ExtractAudio {
                codec: AUDIO_CODEC,
                bitrate: parse_bitrate(quality),
            },
            filename_suffix: "audio".to_string(),
        }),
        DownloadKind::Video => {
            let height = parse_height(quality)?;
            Ok(FormatPlan {
                selector: format!(
                    "bestvideo[height<={height}]+bestaudio/best[height<={height}]"
                ),
                final_extension: VIDEO_CONTAINER,
                post_processing: PostProcessing::MergeInto {
                    container: VIDEO_CONTAINER,
                },
                filename_suffix: format!("{height}p"),
            })
        }
    }
}

fn parse_height(quality: &str) -> Result<u32, ServiceError> {
    quality
        .trim()
        .trim_end_matches(['p', 'P'])
        .parse::<u32>()
        .ok()
        .filter(|height| *height > 0)
        .ok_or_else(|| ServiceError::InvalidQuality(quality.to_string()))
}

fn parse_bitrate(quality: &str) -> String {
    let digits = quality
        .trim()
        .trim_end_matches(|character: char| !character.is_ascii_digit());

    if !digits.is_empty() && digits.chars().all(|character| character.is_ascii_digit()) {
        digits.to_string()
    } else {
        BEST_AUDIO_QUALITY.to_string()
    }
}
