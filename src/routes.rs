use std::{collections::HashSet, io::ErrorKind, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ApiError, ApiResult, ServiceError},
    files::{content_type_for_filename, open_cached_file},
    info::{VariantCatalog, query_info},
    orchestrator::{DownloadRequest, Downloader},
    sanitize::build_content_disposition,
};

#[derive(Clone)]
pub struct AppState {
    pub downloader: Downloader,
    pub download_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    success: bool,
    #[serde(flatten)]
    catalog: VariantCatalog,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    success: bool,
    filename: String,
    download_url: String,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", post(get_info))
        .route("/api/download", post(start_download))
        .route("/api/file/{filename}", get(serve_file))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn read_payload<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        debug!("Rejected request body: {rejection}");
        let message = format!("Invalid request body: {}", rejection.body_text());
        ServiceError::MissingInput(message).into()
    })
}

async fn get_info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<InfoResponse>> {
    let payload = read_payload(payload)?;
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ServiceError::missing_url().into());
    }

    let catalog = query_info(state.downloader.resolver(), url)
        .await
        .map_err(|error| {
            warn!("Info lookup for {:?} failed: {error}", url);
            ApiError::from(error)
        })?;

    Ok(Json(InfoResponse {
        success: true,
        catalog,
    }))
}

async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResponse>> {
    let request = read_payload(payload)?;
    let artifact = state.downloader.download(&request).await?;
    debug!(
        "{} resolved to {:?} ({})",
        artifact.filename_base, artifact.resolved_path, artifact.final_extension
    );

    Ok(Json(DownloadResponse {
        success: true,
        download_url: artifact.download_url(),
        filename: artifact.filename,
    }))
}

async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let cached = open_cached_file(&state.download_dir, &filename).await?;

    let file = open_for_streaming(&cached.path).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&cached.filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(cached.size));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&cached.filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );

    info!("Serving {} ({} bytes)", cached.filename, cached.size);
    Ok((headers, body).into_response())
}

async fn open_for_streaming(path: &std::path::Path) -> ApiResult<tokio::fs::File> {
    tokio::fs::File::open(path).await.map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            debug!("{:?} was evicted before it could be served", path);
            ApiError::from(ServiceError::NotFound("File not found".to_string()))
        } else {
            ApiError::internal(format!("Could not read cached file: {error}"))
        }
    })
}

pub fn build_cors_layer(configured: &[String]) -> ApiResult<CorsLayer> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Any origin may call the API.");
        return Ok(base.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. \
                     Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!(
            "CORS origin check raw={:?} normalized={:?} allowed={}",
            origin, normalized, allowed
        );
        allowed
    });

    Ok(base.allow_origin(allow_origin))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolver::{MediaMetadata, MediaResolver, RawFormat},
        testing::StubResolver,
    };
    use axum::{
        body::{Bytes, to_bytes},
        http::StatusCode,
    };
    use serde_json::{Value, json};
    use std::sync::atomic::Ordering;
    use tempfile::{TempDir, tempdir};

    struct Harness {
        _dir: TempDir,
        state: AppState,
        resolver: Arc<StubResolver>,
    }

    fn harness(resolver: StubResolver) -> Harness {
        let dir = tempdir().unwrap();
        let resolver = Arc::new(resolver);
        let shared: Arc<dyn MediaResolver> = resolver.clone();
        let state = AppState {
            downloader: Downloader::new(shared, dir.path().to_path_buf()),
            download_dir: dir.path().to_path_buf(),
        };
        Harness {
            _dir: dir,
            state,
            resolver,
        }
    }

    fn body<T: serde::de::DeserializeOwned>(value: Value) -> Result<Json<T>, JsonRejection> {
        Ok(Json(serde_json::from_value(value).unwrap()))
    }

    async fn json_of(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes: Bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn info_without_url_is_bad_request() {
        let h = harness(StubResolver::titled("Clip", "mp4"));
        let error = get_info(State(h.state.clone()), body(json!({})))
            .await
            .unwrap_err();

        let (status, value) = json_of(error.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["success"], false);
        assert!(value["error"].is_string());
        assert_eq!(h.resolver.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn download_without_url_is_bad_request() {
        let h = harness(StubResolver::titled("Clip", "mp4"));
        let error = start_download(
            State(h.state.clone()),
            body(json!({"url": "", "format": "video", "quality": "720p"})),
        )
        .await
        .unwrap_err();

        let (status, value) = json_of(error.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["success"], false);
        assert_eq!(h.resolver.metadata_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.resolver.download_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn download_with_bad_quality_is_bad_request() {
        let h = harness(StubResolver::titled("Clip", "mp4"));
        let error = start_download(
            State(h.state.clone()),
            body(json!({"url": "https://example.com/v", "format": "video", "quality": "abcp"})),
        )
        .await
        .unwrap_err();

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(h.resolver.metadata_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn audio_download_end_to_end() {
        let h = harness(StubResolver::titled("My Song", "mp3"));
        let Json(response) = start_download(
            State(h.state.clone()),
            body(json!({"url": "https://example.com/v", "format": "audio", "quality": "128kbps"})),
        )
        .await
        .unwrap();

        assert!(response.success);
        assert_eq!(response.filename, "My_Song_audio.mp3");
        assert_eq!(response.download_url, "/api/file/My_Song_audio.mp3");

        let served = serve_file(State(h.state.clone()), Path(response.filename.clone()))
            .await
            .unwrap();
        assert_eq!(served.status(), StatusCode::OK);
        assert_eq!(served.headers().get(CONTENT_TYPE).unwrap(), "audio/mpeg");
        assert!(
            served
                .headers()
                .get(CONTENT_DISPOSITION)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("attachment; filename=\"My_Song_audio.mp3\"")
        );
        let bytes = to_bytes(served.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"media");
    }

    #[tokio::test]
    async fn resolver_failure_is_server_error() {
        let mut stub = StubResolver::titled("Clip", "mp4");
        stub.fail_metadata = true;
        let h = harness(stub);

        let error = get_info(
            State(h.state.clone()),
            body(json!({"url": "https://nope"})),
        )
        .await
        .unwrap_err();

        let (status, value) = json_of(error.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(value["error"].as_str().unwrap().contains("Unsupported URL"));
    }

    #[test]
    fn info_response_has_flat_shape() {
        let response = InfoResponse {
            success: true,
            catalog: crate::info::build_catalog(
                "https://example.com/v",
                MediaMetadata {
                    title: Some("Clip".into()),
                    extractor: Some("youtube".into()),
                    formats: vec![RawFormat {
                        format_id: "22".into(),
                        ext: Some("mp4".into()),
                        vcodec: Some("avc1".into()),
                        acodec: Some("mp4a".into()),
                        height: Some(720),
                    }],
                    ..MediaMetadata::default()
                },
            ),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["title"], "Clip");
        assert_eq!(value["platform"], "youtube");
        assert_eq!(value["webpage_url"], "https://example.com/v");
        assert_eq!(
            value["formats"][0],
            json!({"format_id": "22", "quality": "720p", "height": 720, "ext": "mp4"})
        );
    }

    #[tokio::test]
    async fn file_traversal_is_not_found() {
        let h = harness(StubResolver::titled("Clip", "mp4"));
        let error = serve_file(State(h.state.clone()), Path("../etc/passwd".to_string()))
            .await
            .unwrap_err();
        let (status, value) = json_of(error.into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"], "File not found");
    }

    #[tokio::test]
    async fn file_evicted_before_streaming_is_not_found() {
        let h = harness(StubResolver::titled("Clip", "mp4"));
        let gone = h.state.download_dir.join("Clip_720p.mp4");
        std::fs::write(&gone, b"media").unwrap();
        let cached = open_cached_file(&h.state.download_dir, "Clip_720p.mp4")
            .await
            .unwrap();
        std::fs::remove_file(&gone).unwrap();

        let error = open_for_streaming(&cached.path).await.unwrap_err();
        let (status, value) = json_of(error.into_response()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(value["error"], "File not found");
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("HTTPS://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_configured_origin_fails_startup() {
        assert!(build_cors_layer(&["not a url".to_string()]).is_err());
        assert!(build_cors_layer(&["https://ok.example".to_string()]).is_ok());
        assert!(build_cors_layer(&[]).is_ok());
    }
}
