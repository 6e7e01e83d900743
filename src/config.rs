use std::{path::PathBuf, time::Duration};

const DEFAULT_DOWNLOAD_DIR: &str = "/tmp/downloads";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_CACHE_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60 * 60;
const DEFAULT_RESOLVER_BINARY: &str = "yt-dlp";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub download_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cleanup_interval: Duration,
    pub resolver_binary: String,
    pub resolver_timeout: Option<Duration>,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str| {
            lookup(name)
                .as_deref()
                .and_then(non_empty)
                .map(ToString::to_string)
        };
        let seconds = |name: &str| {
            text(name).and_then(|value| value.parse::<u64>().ok())
        };

        let bind_addr = text("APP_ADDR")
            .or_else(|| {
                text("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        Self {
            bind_addr,
            download_dir: text("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            cache_ttl: Duration::from_secs(
                seconds("CACHE_TTL_SECONDS").unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            ),
            cleanup_interval: Duration::from_secs(
                seconds("CLEANUP_INTERVAL_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECONDS),
            ),
            resolver_binary: text("YT_DLP_BIN")
                .unwrap_or_else(|| DEFAULT_RESOLVER_BINARY.to_string()),
            resolver_timeout: seconds("RESOLVER_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs),
            allowed_origins: text("ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
