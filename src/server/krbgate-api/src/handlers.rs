//! Route handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use krbgate_auth::{AuthOutcome, Grant, LoginReply, LoginRequest, RenewRequest};
use krbgate_spnego::challenge_header;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::AppState;

/// Health payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Login backend name.
    pub backend: &'static str,
    /// Whether a configuration snapshot is published.
    pub configured: bool,
}

/// `GET /v1/sys/health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend.name(),
        configured: state.backend.is_configured(),
    })
}

/// `POST /v1/auth/kerberos/login`
///
/// The token comes from the `Authorization` header, or from the
/// `authorization` body field when the header is absent.
pub async fn login(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    let mut request: LoginRequest = parse_body(&body)?;
    if let Some(value) = authorization(&headers)? {
        request.authorization = Some(value);
    }
    reply(state.backend.login(request).await)
}

/// `POST /v1/auth/kerberos/renew`
///
/// Requires a negotiation token like a login; the grant is renewed for the
/// authenticated principal.
pub async fn renew(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    let mut request: RenewRequest = parse_body(&body)?;
    if let Some(value) = authorization(&headers)? {
        request.authorization = Some(value);
    }
    reply(state.backend.renew(request).await)
}

fn authorization(headers: &HeaderMap) -> Result<Option<String>> {
    headers
        .get(AUTHORIZATION)
        .map(|value| {
            value.to_str().map(str::to_string).map_err(|_| {
                warn!("authorization header is not valid ASCII");
                ApiError::Unauthorized { challenge: None }
            })
        })
        .transpose()
}

fn reply(outcome: AuthOutcome) -> Result<Response> {
    match outcome.into_reply() {
        LoginReply::Granted(grant) => Ok(granted(grant)),
        LoginReply::Unauthorized { challenge } => Err(ApiError::Unauthorized { challenge }),
        LoginReply::BadRequest(message) => Err(ApiError::BadRequest(message)),
        LoginReply::Internal => Err(ApiError::Internal),
    }
}

fn granted(grant: Grant) -> Response {
    let negotiate = grant
        .response_token
        .as_deref()
        .and_then(|token| HeaderValue::from_str(&challenge_header(Some(token))).ok());

    let mut response = (StatusCode::OK, Json(serde_json::json!({ "auth": grant }))).into_response();
    if let Some(value) = negotiate {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "rejecting request body");
        ApiError::BadRequest(format!("invalid request body: {e}"))
    })
}
