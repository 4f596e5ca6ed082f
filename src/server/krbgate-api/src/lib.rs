//! # krbgate API
//!
//! REST API layer for krbgate.
//!
//! ## Endpoints
//!
//! - `POST /v1/auth/kerberos/login` - SPNEGO login
//! - `POST /v1/auth/kerberos/renew` - Lease renewal, SPNEGO authenticated
//! - `GET /v1/sys/health` - Health

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use krbgate_auth::LoginBackend;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn LoginBackend>,
}

impl AppState {
    /// Wraps a login backend.
    pub fn new(backend: Arc<dyn LoginBackend>) -> Self {
        Self { backend }
    }
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/auth/kerberos/login", post(handlers::login))
        .route("/v1/auth/kerberos/renew", post(handlers::renew))
        .route("/v1/sys/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::{to_bytes, Body};
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use krbgate_auth::testing::FakeDirectory;
    use krbgate_auth::{
        ConfigSnapshot, ConfigStore, GroupEntry, KerberosConfig, LdapConfig, LoginOrchestrator,
    };
    use krbgate_spnego::testing::{service_keytab, TicketForge, SERVICE_ACCOUNT};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(directory: Arc<FakeDirectory>) -> Router {
        let kerberos = KerberosConfig {
            keytab: BASE64.encode(service_keytab().to_bytes()),
            service_account: SERVICE_ACCOUNT.to_string(),
            token_policies: vec!["default".into()],
            token_ttl: 3600,
            token_max_ttl: 7200,
            ..Default::default()
        };
        let ldap = LdapConfig {
            url: "ldap://fake".into(),
            ..Default::default()
        };
        let groups = BTreeMap::from([(
            "Admins".to_string(),
            GroupEntry {
                policies: vec!["admin".into()],
            },
        )]);

        let store = Arc::new(ConfigStore::new());
        store.publish(ConfigSnapshot::build(kerberos, ldap, groups).unwrap());
        router(AppState::new(Arc::new(LoginOrchestrator::new(store, directory))))
    }

    fn admins() -> Arc<FakeDirectory> {
        FakeDirectory::with_groups("alice", &["CN=Admins,OU=Groups,DC=example,DC=com"])
    }

    fn login(authorization: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/v1/auth/kerberos/login").header(CONTENT_TYPE, "application/json");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(admins())
            .oneshot(Request::get("/v1/sys/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "kerberos");
        assert_eq!(body["configured"], true);
    }

    #[tokio::test]
    async fn test_missing_token_challenges() {
        let directory = admins();
        for body in ["", r#"{"ttl":"5m"}"#, r#"{"ttl":"garbage"}"#] {
            let response = app(directory.clone()).oneshot(login(None, body)).await.unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(response.headers()[WWW_AUTHENTICATE], "Negotiate");
            assert_eq!(json(response).await["errors"][0], "authentication failed");
        }
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_login_success() {
        let token = TicketForge::new("alice").authorization();
        let response = app(admins())
            .oneshot(login(Some(&token), r#"{"ttl":"5m"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let negotiate = response.headers()[WWW_AUTHENTICATE].to_str().unwrap().to_string();
        assert!(negotiate.starts_with("Negotiate "));

        let body = json(response).await;
        assert_eq!(body["auth"]["principal"], "alice@EXAMPLE.COM");
        assert_eq!(body["auth"]["lease_duration"], 300);
        assert_eq!(body["auth"]["policies"], serde_json::json!(["admin", "default"]));
        assert_eq!(body["auth"]["metadata"]["user"], "alice");
    }

    #[tokio::test]
    async fn test_token_in_body() {
        let token = TicketForge::new("alice").authorization();
        let body = serde_json::json!({ "authorization": token }).to_string();
        let response = app(admins()).oneshot(login(None, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["auth"]["lease_duration"], 3600);
    }

    #[tokio::test]
    async fn test_bad_ttl_is_bad_request() {
        let directory = admins();
        let token = TicketForge::new("alice").authorization();
        let response = app(directory.clone())
            .oneshot(login(Some(&token), r#"{"ttl":"invalid"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert!(body["errors"][0]
            .as_str()
            .unwrap()
            .starts_with("invalid ttl format"));
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_rejected_token_hides_reason() {
        let directory = admins();
        let token = TicketForge::new("alice")
            .realm("OTHER.ORG")
            .authorization();
        let response = app(directory.clone())
            .oneshot(login(Some(&token), r#"{"ttl":"5m"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Negotiate");
        let body = json(response).await;
        assert_eq!(body, serde_json::json!({ "errors": ["authentication failed"] }));
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_directory_failure_is_internal() {
        let token = TicketForge::new("alice").authorization();
        let response = app(FakeDirectory::unreachable())
            .oneshot(login(Some(&token), ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(response).await;
        assert_eq!(body, serde_json::json!({ "errors": ["internal error"] }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let response = app(admins()).oneshot(login(None, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn renew(authorization: Option<&str>, policies: Value) -> Request<Body> {
        let mut builder = Request::post("/v1/auth/kerberos/renew").header(CONTENT_TYPE, "application/json");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let body = serde_json::json!({
            "username": "alice",
            "realm": "EXAMPLE.COM",
            "policies": policies,
        });
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_renew_challenges() {
        let directory = admins();
        let response = app(directory.clone())
            .oneshot(renew(None, serde_json::json!(["admin", "default"])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Negotiate");
        assert_eq!(json(response).await["errors"][0], "authentication failed");
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_renew_for_other_principal_rejected() {
        let directory = admins();
        directory.add_user("bob", &[]);
        let token = TicketForge::new("bob").authorization();
        let response = app(directory.clone())
            .oneshot(renew(Some(&token), serde_json::json!(["admin", "default"])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Negotiate");
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_renew() {
        let token = TicketForge::new("alice").authorization();

        let response = app(admins())
            .oneshot(renew(Some(&token), serde_json::json!(["admin", "default"])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["auth"]["principal"], "alice@EXAMPLE.COM");
        assert_eq!(body["auth"]["lease_duration"], 3600);

        let response = app(admins())
            .oneshot(renew(Some(&token), serde_json::json!(["default"])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json(response).await["errors"][0],
            "policies have changed, not renewing"
        );
    }
}
