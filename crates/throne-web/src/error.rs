//! Error types for the JSON API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use throne_cache::CoreError;

use crate::routes::ApiStatus;

/// Errors a handler can return.
#[derive(Debug, Error)]
pub enum WebError {
    /// Error from the cache and aggregation layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// No valid session cookie.
    #[error("not logged in")]
    Unauthorized,

    /// Logged in, but not an admin.
    #[error("admin access required")]
    Forbidden,

    /// Request the core would accept but the API does not.
    #[error("{0}")]
    BadRequest(String),
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Core(CoreError::Validation(_)) | WebError::Core(CoreError::MatchStarted(_)) => {
                StatusCode::BAD_REQUEST
            }
            WebError::Core(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            WebError::Core(CoreError::Store(_)) | WebError::Core(CoreError::Load(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WebError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebError::Forbidden => StatusCode::FORBIDDEN,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage details stay in the log.
        let text = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
            self.to_string()
        };
        (status, Json(ApiStatus::fail(text))).into_response()
    }
}
