//! API Error Taxonomy
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl maps
//! each variant to an HTTP status and a `{"success": false, "error": ...}`
//! JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing request fields. Raised before any downstream call.
    #[error("{0}")]
    Validation(String),

    /// Unknown stack kind or DNS record type.
    #[error("unsupported kind: {0}")]
    UnsupportedKind(String),

    /// The orchestration manager rejected the login call.
    #[error("authentication with the orchestration manager failed: {0}")]
    Authentication(String),

    /// A downstream call rejected the current session token. The cache has
    /// already been invalidated when this surfaces; the next call logs in again.
    #[error("session token rejected by the orchestration manager")]
    AuthorizationExpired,

    /// Any other non-success downstream response.
    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// Wire-level failure talking to a downstream API.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::UnsupportedKind(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_)
            | ApiError::AuthorizationExpired
            | ApiError::Upstream { .. }
            | ApiError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}
