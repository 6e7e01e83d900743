mod config;
mod error;
mod files;
mod formats;
mod inflight;
mod info;
mod janitor;
mod orchestrator;
mod resolver;
mod routes;
mod sanitize;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    error::ApiError,
    janitor::spawn_janitor,
    orchestrator::Downloader,
    resolver::{MediaResolver, YtDlpResolver},
    routes::{AppState, build_cors_layer, router},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vidgrab=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        tracing::error!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create download directory {:?}: {error}",
                config.download_dir
            ))
        })?;

    let resolver: Arc<dyn MediaResolver> = Arc::new(YtDlpResolver::new(
        config.resolver_binary.clone(),
        config.resolver_timeout,
    ));
    let state = AppState {
        downloader: Downloader::new(resolver, config.download_dir.clone()),
        download_dir: config.download_dir.clone(),
    };

    spawn_janitor(
        config.download_dir.clone(),
        config.cache_ttl,
        config.cleanup_interval,
    );

    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not bind {}: {error}",
                config.bind_addr
            ))
        })?;

    info!(
        "VidGrab ready on http://{} (downloads in {:?})",
        config.bind_addr, config.download_dir
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
