//! API error mapping.
//!
//! Token problems always surface as a uniform 401 with a
//! `WWW-Authenticate: Bearer` challenge; permission failures are 403 and
//! name the missing permission for debuggability.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use nexus_core::error::Error;

/// Wrapper turning the runtime error into an HTTP response
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // All authentication problems look identical to the caller
        let message = if status == StatusCode::UNAUTHORIZED {
            "Not authenticated".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": self.0.error_code(),
                "message": message,
            }
        }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Result alias for handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
