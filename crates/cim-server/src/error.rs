use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use cim_engine::{MergeError, MergeErrorKind};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Merge(err) => match err.kind() {
                MergeErrorKind::Authentication => StatusCode::UNAUTHORIZED,
                MergeErrorKind::Authorization => StatusCode::FORBIDDEN,
                MergeErrorKind::NotFound | MergeErrorKind::Validation => StatusCode::BAD_REQUEST,
                MergeErrorKind::Conflict => StatusCode::CONFLICT,
                MergeErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Fixture(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
