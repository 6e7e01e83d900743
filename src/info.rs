use std::collections::HashSet;

use serde::Serialize;
use serde_json::Number;
use tracing::info;

use crate::{
    error::ServiceError,
    resolver::{MediaMetadata, MediaResolver, RawFormat},
};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamVariant {
    pub format_id: String,
    pub quality: String,
    pub height: u32,
    pub ext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantCatalog {
    pub title: String,
    pub uploader: String,
    pub duration: Number,
    pub thumbnail: String,
    pub webpage_url: String,
    pub platform: String,
    pub formats: Vec<StreamVariant>,
}

pub async fn query_info(
    resolver: &dyn MediaResolver,
    url: &str,
) -> Result<VariantCatalog, ServiceError> {
    let metadata = resolver
        .resolve_metadata(url)
        .await
        .map_err(ServiceError::resolution)?;

    let catalog = build_catalog(url, metadata);
    info!(
        "Resolved {:?} on {} with {} variant(s)",
        url,
        catalog.platform,
        catalog.formats.len()
    );
    Ok(catalog)
}

pub fn build_catalog(url: &str, metadata: MediaMetadata) -> VariantCatalog {
    VariantCatalog {
        title: text_or(metadata.title, UNKNOWN),
        uploader: text_or(metadata.uploader, UNKNOWN),
        duration: metadata.duration.unwrap_or_else(|| Number::from(0)),
        thumbnail: metadata.thumbnail.unwrap_or_default(),
        webpage_url: text_or(metadata.webpage_url, url),
        platform: text_or(metadata.extractor, UNKNOWN),
        formats: build_variants(&metadata.formats),
    }
}

/// Keeps combined audio+video streams, one per height (first wins), tallest
/// first.
pub fn build_variants(formats: &[RawFormat]) -> Vec<StreamVariant> {
    let mut seen_heights = HashSet::new();
    let mut variants: Vec<StreamVariant> = formats
        .iter()
        .filter(|format| format.has_video() && format.has_audio())
        .filter_map(|format| {
            let height = format.height.filter(|height| *height > 0)?;
            seen_heights.insert(height).then(|| StreamVariant {
                format_id: format.format_id.clone(),
                quality: format!("{height}p"),
                height,
                ext: format.ext.clone().unwrap_or_default(),
            })
        })
        .collect();

    variants.sort_by(|a, b| b.height.cmp(&a.height));
    variants
}

fn text_or(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
