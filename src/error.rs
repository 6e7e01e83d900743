use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::resolver::ResolverError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    MissingInput(String),

    #[error("Invalid quality: {0}")]
    InvalidQuality(String),

    #[error("Could not resolve media: {0}")]
    ResolutionFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("{0}")]
    NotFound(String),
}

impl ServiceError {
    pub fn missing_url() -> Self {
        Self::MissingInput("No URL provided".to_string())
    }

    pub fn resolution(error: ResolverError) -> Self {
        Self::ResolutionFailed(error.to_string())
    }

    pub fn download(error: ResolverError) -> Self {
        Self::DownloadFailed(error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingInput(_) | Self::InvalidQuality(_) => StatusCode::BAD_REQUEST,
            Self::ResolutionFailed(_) | Self::DownloadFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            success: false,
            error: self.message,
        });

        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
