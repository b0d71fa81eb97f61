use crate::api::auth::AccessDenied;
use crate::query::columns::UnknownMetric;
use crate::query::period::PeriodError;
use crate::query::segment::InvalidSegment;
use crate::storage::archive::ArchiveError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// API error type with HTTP status code mapping.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    AccessDenied(AccessDenied),
    NotFound(String),
    Internal(String),
    Archive(ArchiveError),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            Self::AccessDenied(e) => write!(f, "Access denied: {e}"),
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::Internal(msg) => write!(f, "Internal error: {msg}"),
            Self::Archive(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::AccessDenied(e) => (StatusCode::FORBIDDEN, e.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::Archive(e) => {
                tracing::error!(error = %e, "Archive error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        Self::Archive(e)
    }
}

impl From<AccessDenied> for ApiError {
    fn from(e: AccessDenied) -> Self {
        Self::AccessDenied(e)
    }
}

impl From<UnknownMetric> for ApiError {
    fn from(e: UnknownMetric) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<PeriodError> for ApiError {
    fn from(e: PeriodError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<InvalidSegment> for ApiError {
    fn from(e: InvalidSegment) -> Self {
        Self::BadRequest(e.to_string())
    }
}
