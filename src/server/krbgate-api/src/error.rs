//! API error responses.

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use krbgate_auth::{AuthError, LoginReply};
use krbgate_spnego::challenge_header;

/// Result type for API handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error type for API handlers.
///
/// Messages are caller-facing; internal detail is logged before an error
/// gets here.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credentials missing or rejected.
    #[error("authentication failed")]
    Unauthorized {
        /// Continuation token for `WWW-Authenticate`.
        challenge: Option<Vec<u8>>,
    },

    /// The request is invalid.
    #[error("{0}")]
    BadRequest(String),

    /// Anything the caller cannot fix.
    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "errors": [self.to_string()] });
        let mut response = (status, Json(body)).into_response();

        if let ApiError::Unauthorized { challenge } = &self {
            if let Ok(value) = HeaderValue::from_str(&challenge_header(challenge.as_deref())) {
                response.headers_mut().insert(WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err.into_reply() {
            LoginReply::Unauthorized { challenge } => ApiError::Unauthorized { challenge },
            LoginReply::BadRequest(message) => ApiError::BadRequest(message),
            LoginReply::Granted(_) | LoginReply::Internal => ApiError::Internal,
        }
    }
}
