//! Integration tests for the krbgate server.
//!
//! These tests drive the HTTP surface end to end: a real listener on
//! `127.0.0.1:0`, a `reqwest` client, forged Kerberos tickets and a counting
//! directory fake.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use krbgate_api::AppState;
use krbgate_auth::testing::FakeDirectory;
use krbgate_auth::{
    ConfigSnapshot, ConfigStore, Directory, GroupEntry, KerberosConfig, LdapConfig,
    LoginOrchestrator,
};
use krbgate_spnego::testing::{service_keytab, SERVICE_ACCOUNT};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub configured: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct LoginBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<String>,
}

/// Raw outcome of one login call.
#[derive(Debug)]
pub struct LoginResult {
    pub status: StatusCode,
    pub negotiate: Option<String>,
    pub body: serde_json::Value,
}

impl LoginResult {
    /// Decoded token carried after `Negotiate ` in `WWW-Authenticate`.
    pub fn negotiate_token(&self) -> Option<Vec<u8>> {
        let value = self.negotiate.as_deref()?;
        let encoded = value.strip_prefix("Negotiate ")?;
        BASE64.decode(encoded).ok()
    }
}

// ============================================================================
// Test Server
// ============================================================================

/// Kerberos settings shared by the scenarios.
pub fn kerberos_config() -> KerberosConfig {
    KerberosConfig {
        keytab: BASE64.encode(service_keytab().to_bytes()),
        service_account: SERVICE_ACCOUNT.to_string(),
        token_policies: vec!["default".into()],
        token_ttl: 3600,
        token_max_ttl: 8 * 3600,
        ..Default::default()
    }
}

/// Group mapping shared by the scenarios.
pub fn groups(entries: &[(&str, &[&str])]) -> BTreeMap<String, GroupEntry> {
    entries
        .iter()
        .map(|(name, policies)| {
            (
                name.to_string(),
                GroupEntry {
                    policies: policies.iter().map(|p| p.to_string()).collect(),
                },
            )
        })
        .collect()
}

/// Builds a snapshot against a fake directory URL.
pub fn snapshot(kerberos: KerberosConfig, groups: BTreeMap<String, GroupEntry>) -> ConfigSnapshot {
    let ldap = LdapConfig {
        url: "ldap://dc.example.com".into(),
        binddn: "cn=krbgate,ou=services,dc=example,dc=com".into(),
        bindpass: "secret".into(),
        userdn: "ou=users,dc=example,dc=com".into(),
        request_timeout: 5,
        ..Default::default()
    };
    ConfigSnapshot::build(kerberos, ldap, groups).unwrap()
}

/// An in-process server bound to an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub store: Arc<ConfigStore>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Starts a server over `directory` with the default configuration.
    pub async fn start(directory: Arc<dyn Directory>) -> Result<Self> {
        let store = Arc::new(ConfigStore::new());
        store.publish(snapshot(
            kerberos_config(),
            groups(&[("Admins", &["admin"][..]), ("Developers", &["dev", "default"][..])]),
        ));
        Self::start_with_store(directory, store).await
    }

    /// Starts a server reading `store`.
    pub async fn start_with_store(directory: Arc<dyn Directory>, store: Arc<ConfigStore>) -> Result<Self> {
        let backend = LoginOrchestrator::new(Arc::clone(&store), directory);
        let app = krbgate_api::router(AppState::new(Arc::new(backend)));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        let server = Self {
            base_url: format!("http://{addr}"),
            addr,
            store,
            shutdown: Some(tx),
            handle: Some(handle),
        };
        server.wait_for_ready().await?;
        Ok(server)
    }

    /// Wait for the server to be ready to accept connections.
    async fn wait_for_ready(&self) -> Result<()> {
        let client = self.client();
        for _ in 0..50 {
            if client.health().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("Server failed to start within 1 second")
    }

    /// Get a configured HTTP client for this server.
    pub fn client(&self) -> KrbgateClient {
        KrbgateClient::new(&self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// HTTP client for testing the krbgate API.
pub struct KrbgateClient {
    client: Client,
    base_url: String,
}

impl KrbgateClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self.client.get(self.url("/v1/sys/health")).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    /// Posts a login with an optional `Authorization` value and TTL.
    pub async fn login(&self, authorization: Option<&str>, ttl: Option<&str>) -> Result<LoginResult> {
        let mut req = self.client.post(self.url("/v1/auth/kerberos/login")).json(&LoginBody {
            ttl: ttl.map(str::to_string),
        });
        if let Some(value) = authorization {
            req = req.header(AUTHORIZATION, value);
        }
        let resp = req.send().await?;

        let status = resp.status();
        let negotiate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.json().await?;
        Ok(LoginResult {
            status,
            negotiate,
            body,
        })
    }

    /// Posts a renewal with an optional `Authorization` value.
    pub async fn renew(
        &self,
        authorization: Option<&str>,
        username: &str,
        realm: &str,
        policies: &[&str],
    ) -> Result<(StatusCode, Option<String>, serde_json::Value)> {
        let mut req = self
            .client
            .post(self.url("/v1/auth/kerberos/renew"))
            .json(&serde_json::json!({
                "username": username,
                "realm": realm,
                "policies": policies,
            }));
        if let Some(value) = authorization {
            req = req.header(AUTHORIZATION, value);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let negotiate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok((status, negotiate, resp.json().await?))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use krbgate_crypto::key_usage;
    use krbgate_crypto::{EncryptionKey, EncryptionType};
    use krbgate_spnego::gss::{self, InitialContextToken};
    use krbgate_spnego::messages::{ApRep, EncApRepPart};
    use krbgate_spnego::negotiate::{NegState, NegTokenInit, NegTokenResp};
    use krbgate_spnego::testing::TicketForge;

    const TTLS: [&str; 5] = ["5m", "1h", "30s", "1h30m", ""];

    fn alice_directory() -> Arc<FakeDirectory> {
        let directory = FakeDirectory::with_groups(
            "alice",
            &[
                "CN=Admins,OU=Groups,DC=example,DC=com",
                "CN=Developers,OU=Groups,DC=example,DC=com",
            ],
        );
        directory.add_user("bob", &["CN=Developers,OU=Groups,DC=example,DC=com"]);
        directory
    }

    fn assert_challenge(result: &LoginResult) {
        assert_eq!(result.status, StatusCode::UNAUTHORIZED, "{result:?}");
        assert!(result
            .negotiate
            .as_deref()
            .is_some_and(|v| v.starts_with("Negotiate")));
        assert_eq!(result.body["errors"][0], "authentication failed");
    }

    #[tokio::test]
    async fn test_server_health() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let health = server.client().health().await.unwrap();

        assert_eq!(health.status, "ok");
        assert_eq!(health.backend, "kerberos");
        assert!(health.configured);
        assert!(!health.version.is_empty());
    }

    #[tokio::test]
    async fn test_empty_or_malformed_tokens_always_challenge() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();
        let client = server.client();

        let malformed = [
            None,
            Some("Negotiate"),
            Some("Negotiate %%%"),
            Some("Negotiate YWJj"),
            Some("Negotiate oQMwAQ=="),
            Some("Basic YWxpY2U6cHc="),
        ];
        for header in malformed {
            for ttl in TTLS {
                let result = client.login(header, Some(ttl)).await.unwrap();
                assert_challenge(&result);
            }
        }
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_empty_token_challenge_is_bare() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let result = server.client().login(None, None).await.unwrap();

        assert_eq!(result.status, StatusCode::UNAUTHORIZED);
        assert_eq!(result.negotiate.as_deref(), Some("Negotiate"));
    }

    #[tokio::test]
    async fn test_invalid_token_with_ttl_never_queries_directory() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();
        let client = server.client();

        let forged = TicketForge::new("alice")
            .service_key(EncryptionKey::generate(EncryptionType::Aes256CtsHmacSha196))
            .authorization();
        let result = client.login(Some(&forged), Some("5m")).await.unwrap();

        assert_challenge(&result);
        assert_eq!(result.negotiate.as_deref(), Some("Negotiate"));
        let stats = directory.stats();
        assert_eq!((stats.connects, stats.binds, stats.searches), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_expired_and_mismatched_tickets_look_identical() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let client = server.client();
        let yesterday = chrono::Utc::now() - chrono::Duration::days(1);

        let tokens = [
            TicketForge::new("alice").at(yesterday).authorization(),
            TicketForge::new("alice").authenticator_client("mallory").authorization(),
            TicketForge::new("alice").realm("OTHER.ORG").authorization(),
        ];
        let mut bodies = Vec::new();
        for token in &tokens {
            let result = client.login(Some(token), Some("5m")).await.unwrap();
            assert_challenge(&result);
            bodies.push(result.body);
        }
        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_bad_ttl_is_validation_error_before_directory() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();
        let client = server.client();
        let token = TicketForge::new("alice").authorization();

        for ttl in ["5", "5 m", "1hh", "1x", "1h!", "abc"] {
            let result = client.login(Some(&token), Some(ttl)).await.unwrap();
            assert_eq!(result.status, StatusCode::BAD_REQUEST, "ttl {ttl:?}");
            assert!(result.body["errors"][0]
                .as_str()
                .unwrap()
                .starts_with("invalid ttl format"));
        }
        assert_eq!(directory.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_ttl_values_accepted_for_valid_token() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let client = server.client();
        let token = TicketForge::new("alice").authorization();

        let expected = [300, 3600, 30, 5400, 3600];
        for (ttl, secs) in TTLS.into_iter().zip(expected) {
            let result = client.login(Some(&token), Some(ttl)).await.unwrap();
            assert_eq!(result.status, StatusCode::OK, "ttl {ttl:?}");
            assert_eq!(result.body["auth"]["lease_duration"], secs);
        }
    }

    #[tokio::test]
    async fn test_directory_unavailable_is_internal_error() {
        let server = TestServer::start(FakeDirectory::unreachable()).await.unwrap();
        let token = TicketForge::new("alice").authorization();

        let result = server.client().login(Some(&token), Some("5m")).await.unwrap();
        assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(result.body, serde_json::json!({ "errors": ["internal error"] }));
        assert!(result.negotiate.is_none());
    }

    #[tokio::test]
    async fn test_successful_login_with_mutual_authentication() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();
        let forge = TicketForge::new("alice").mutual(true);

        let result = server
            .client()
            .login(Some(&forge.authorization()), Some("1h30m"))
            .await
            .unwrap();
        assert_eq!(result.status, StatusCode::OK);

        let auth = &result.body["auth"];
        assert_eq!(auth["principal"], "alice@EXAMPLE.COM");
        assert_eq!(auth["policies"], serde_json::json!(["admin", "default", "dev"]));
        assert_eq!(auth["lease_duration"], 5400);
        assert_eq!(auth["renewable"], true);
        assert_eq!(auth["metadata"]["domain"], "EXAMPLE.COM");

        let token = result.negotiate_token().unwrap();
        let resp = NegTokenResp::parse(&token).unwrap();
        assert_eq!(resp.neg_state, Some(NegState::AcceptCompleted));
        assert_eq!(resp.supported_mech, Some(gss::OID_KRB5));

        let framed = InitialContextToken::parse(resp.response_token.unwrap()).unwrap();
        let ap_rep = ApRep::decode(gss::split_krb5(framed.inner, gss::TOK_ID_AP_REP).unwrap()).unwrap();
        let plain = forge
            .session_key()
            .decrypt(key_usage::AP_REP_ENC_PART, &ap_rep.enc_part.cipher)
            .unwrap();
        EncApRepPart::decode(&plain).unwrap();

        let stats = directory.stats();
        assert_eq!((stats.connects, stats.searches, stats.closes, stats.open), (1, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_two_leg_negotiation() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let client = server.client();

        let init = NegTokenInit {
            mech_types: vec![gss::OID_NTLM, gss::OID_KRB5],
            mech_token: None,
        };
        let first = client
            .login(Some(&format!("Negotiate {}", BASE64.encode(init.encode().unwrap()))), None)
            .await
            .unwrap();
        assert_eq!(first.status, StatusCode::UNAUTHORIZED);
        let continuation = first.negotiate_token().unwrap();
        let resp = NegTokenResp::parse(&continuation).unwrap();
        assert_eq!(resp.neg_state, Some(NegState::AcceptIncomplete));
        assert_eq!(resp.supported_mech, Some(gss::OID_KRB5));

        let krb5 = TicketForge::new("bob").krb5();
        let second_leg = NegTokenResp {
            response_token: Some(krb5.as_slice()),
            ..Default::default()
        };
        let second = client
            .login(
                Some(&format!("Negotiate {}", second_leg.to_base64().unwrap())),
                Some("30s"),
            )
            .await
            .unwrap();
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.body["auth"]["policies"], serde_json::json!(["default", "dev"]));
        assert_eq!(second.body["auth"]["lease_duration"], 30);
    }

    #[tokio::test]
    async fn test_configuration_update_applies_to_next_request() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let client = server.client();
        let token = TicketForge::new("bob").authorization();

        let before = client.login(Some(&token), None).await.unwrap();
        assert_eq!(before.body["auth"]["policies"], serde_json::json!(["default", "dev"]));

        server.store.publish(snapshot(
            KerberosConfig {
                token_policies: vec!["base".into()],
                ..kerberos_config()
            },
            groups(&[("Developers", &["builder"][..])]),
        ));
        let after = client.login(Some(&token), None).await.unwrap();
        assert_eq!(after.body["auth"]["policies"], serde_json::json!(["base", "builder"]));
    }

    #[tokio::test]
    async fn test_unconfigured_server() {
        let server = TestServer::start_with_store(alice_directory(), Arc::new(ConfigStore::new()))
            .await
            .unwrap();
        let client = server.client();

        assert!(!client.health().await.unwrap().configured);
        let token = TicketForge::new("alice").authorization();
        let result = client.login(Some(&token), None).await.unwrap();
        assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_concurrent_logins() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let client = server.client();
            let user = if i % 2 == 0 { "alice" } else { "bob" };
            let token = TicketForge::new(user).authorization();
            tasks.push(tokio::spawn(async move {
                let result = client.login(Some(&token), Some("5m")).await.unwrap();
                assert_eq!(result.status, StatusCode::OK);
                result.body["auth"]["metadata"]["user"] == user
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(directory.stats().open, 0);
        assert_eq!(directory.stats().connects, 16);
    }

    #[tokio::test]
    async fn test_renew() {
        let server = TestServer::start(alice_directory()).await.unwrap();
        let client = server.client();
        let token = TicketForge::new("bob").authorization();

        let (status, _, body) = client
            .renew(Some(&token), "bob", "EXAMPLE.COM", &["default", "dev"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["auth"]["lease_duration"], 3600);

        let (status, _, body) = client
            .renew(Some(&token), "bob", "EXAMPLE.COM", &["admin"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(errors.errors, vec!["policies have changed, not renewing"]);
    }

    #[tokio::test]
    async fn test_renew_requires_negotiation() {
        let directory = alice_directory();
        let server = TestServer::start(directory.clone()).await.unwrap();
        let client = server.client();

        let (status, negotiate, body) = client
            .renew(None, "alice", "EXAMPLE.COM", &["admin", "default", "dev"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(negotiate.as_deref(), Some("Negotiate"));
        assert_eq!(body, serde_json::json!({ "errors": ["authentication failed"] }));

        let bob = TicketForge::new("bob").authorization();
        let (status, negotiate, _) = client
            .renew(Some(&bob), "alice", "EXAMPLE.COM", &["admin", "default", "dev"])
            .await
            .unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(negotiate.as_deref(), Some("Negotiate"));
        assert_eq!(directory.stats().connects, 0);
    }
}
