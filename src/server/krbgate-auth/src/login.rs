//! Login orchestration.
//!
//! A login walks an explicit state machine:
//!
//! ```text
//! AwaitingToken ─▶ Validating ─┬─▶ Enriching ─┬─▶ Granting
//!        │                     │              └─▶ Erroring
//!        │                     ├─▶ Challenging
//!        └─────────────────────┴─▶ Erroring (bad ttl, not configured)
//! ```
//!
//! Request validation (token decoding, TTL) happens before the directory is
//! contacted. Every request loads one configuration snapshot and uses it
//! throughout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use krbgate_spnego::{
    decode_authorization, ChallengeToken, TokenValidator, ValidationOutcome, VerifiedPrincipal,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::backend::LoginBackend;
use crate::config::{ConfigSnapshot, ConfigStore};
use crate::context::{duration_secs, Alias, AuthOutcome, Grant};
use crate::directory::Directory;
use crate::error::AuthError;
use crate::groups::{GroupResolver, ResolvedGroups};

/// Input of a login attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    /// `Authorization` header value (`Negotiate <base64>`).
    #[serde(default)]
    pub authorization: Option<String>,
    /// Requested TTL, such as `1h30m`.
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Input of a renewal.
///
/// Over HTTP the caller proves who it is with a negotiation token and the
/// grant is renewed for the authenticated principal only. A host that
/// stored the grant itself calls [`LoginOrchestrator::renew`] directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewRequest {
    /// `Authorization` header value (`Negotiate <base64>`).
    #[serde(default)]
    pub authorization: Option<String>,
    /// Username from the original grant.
    #[serde(default)]
    pub username: String,
    /// Realm from the original grant.
    #[serde(default)]
    pub realm: String,
    /// Policies of the original grant.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// States of one login.
#[derive(Debug)]
pub enum LoginState {
    /// Reading the token from the request.
    AwaitingToken,
    /// Verifying the token.
    Validating {
        /// Decoded token.
        token: Vec<u8>,
    },
    /// Resolving directory groups.
    Enriching {
        /// Configuration for this request.
        snapshot: Arc<ConfigSnapshot>,
        /// Authenticated principal.
        principal: VerifiedPrincipal,
        /// Effective TTL.
        ttl: Duration,
        /// Acceptor token for the client.
        response_token: Option<Vec<u8>>,
    },
    /// Building the grant.
    Granting {
        /// Configuration for this request.
        snapshot: Arc<ConfigSnapshot>,
        /// Authenticated principal.
        principal: VerifiedPrincipal,
        /// Effective TTL.
        ttl: Duration,
        /// Groups and mapped policies.
        resolved: ResolvedGroups,
        /// Acceptor token for the client.
        response_token: Option<Vec<u8>>,
    },
    /// Asking the client for a (new) token.
    Challenging {
        /// Continuation artifact.
        challenge: Option<ChallengeToken>,
        /// Internal reason when the token was rejected.
        reason: Option<AuthError>,
    },
    /// Failing with a request or internal error.
    Erroring(AuthError),
}

impl LoginState {
    /// State name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingToken => "awaiting_token",
            Self::Validating { .. } => "validating",
            Self::Enriching { .. } => "enriching",
            Self::Granting { .. } => "granting",
            Self::Challenging { .. } => "challenging",
            Self::Erroring(_) => "erroring",
        }
    }
}

/// Sequences validation, group resolution and TTL resolution.
#[derive(Debug, Clone)]
pub struct LoginOrchestrator {
    config: Arc<ConfigStore>,
    validator: TokenValidator,
    resolver: GroupResolver,
}

impl LoginOrchestrator {
    /// Creates an orchestrator over a config store and a directory.
    pub fn new(config: Arc<ConfigStore>, directory: Arc<dyn Directory>) -> Self {
        Self {
            config,
            validator: TokenValidator::new(),
            resolver: GroupResolver::new(directory),
        }
    }

    /// Replaces the token validator.
    pub fn with_validator(mut self, validator: TokenValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Config store read by every request.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Runs one login.
    pub async fn login(&self, request: &LoginRequest) -> AuthOutcome {
        let snapshot = self.config.snapshot();
        let mut state = LoginState::AwaitingToken;

        loop {
            trace!(state = state.name(), "login step");
            state = match state {
                LoginState::AwaitingToken => Self::await_token(request),
                LoginState::Validating { token } => match &snapshot {
                    Some(snapshot) => self.validate(&token, request, Arc::clone(snapshot)),
                    None => LoginState::Erroring(AuthError::NotConfigured),
                },
                LoginState::Enriching {
                    snapshot,
                    principal,
                    ttl,
                    response_token,
                } => self.enrich(snapshot, principal, ttl, response_token).await,
                LoginState::Granting {
                    snapshot,
                    principal,
                    ttl,
                    resolved,
                    response_token,
                } => {
                    return AuthOutcome::Success(Self::grant(
                        &snapshot,
                        &principal,
                        ttl,
                        resolved,
                        response_token,
                    ))
                },
                LoginState::Challenging { challenge, reason } => {
                    return match reason {
                        Some(reason) => AuthOutcome::Failure(reason),
                        None => AuthOutcome::Continue { challenge },
                    }
                },
                LoginState::Erroring(err) => return AuthOutcome::Failure(err),
            };
        }
    }

    fn await_token(request: &LoginRequest) -> LoginState {
        let header = request.authorization.as_deref().unwrap_or_default();
        match decode_authorization(header) {
            Ok(Some(token)) => LoginState::Validating { token },
            Ok(None) => {
                debug!("no negotiation token, sending initial challenge");
                LoginState::Challenging {
                    challenge: None,
                    reason: None,
                }
            },
            Err(e) => LoginState::Challenging {
                challenge: None,
                reason: Some(e.into()),
            },
        }
    }

    fn validate(&self, token: &[u8], request: &LoginRequest, snapshot: Arc<ConfigSnapshot>) -> LoginState {
        match self.validator.validate(token, snapshot.identity()) {
            ValidationOutcome::Established {
                principal,
                response_token,
            } => {
                let requested = request.ttl.as_deref().unwrap_or_default();
                match snapshot.ttl().resolve_str(requested) {
                    Ok(ttl) => LoginState::Enriching {
                        snapshot,
                        principal,
                        ttl,
                        response_token,
                    },
                    Err(e) => LoginState::Erroring(e.into()),
                }
            },
            ValidationOutcome::Continue(challenge) => LoginState::Challenging {
                challenge: Some(challenge),
                reason: None,
            },
            ValidationOutcome::Rejected(e) => LoginState::Challenging {
                challenge: None,
                reason: Some(e.into()),
            },
        }
    }

    async fn enrich(
        &self,
        snapshot: Arc<ConfigSnapshot>,
        principal: VerifiedPrincipal,
        ttl: Duration,
        response_token: Option<Vec<u8>>,
    ) -> LoginState {
        let username = username_for(&principal, snapshot.kerberos().remove_instance_name);
        match self
            .resolver
            .resolve(&username, snapshot.ldap(), snapshot.groups())
            .await
        {
            Ok(resolved) => LoginState::Granting {
                snapshot,
                principal,
                ttl,
                resolved,
                response_token,
            },
            Err(e) => LoginState::Erroring(e.into()),
        }
    }

    fn grant(
        snapshot: &ConfigSnapshot,
        principal: &VerifiedPrincipal,
        ttl: Duration,
        resolved: ResolvedGroups,
        response_token: Option<Vec<u8>>,
    ) -> Grant {
        let kerberos = snapshot.kerberos();
        let username = username_for(principal, kerberos.remove_instance_name);
        let policies = merge_policies(&kerberos.token_policies, &resolved.policies);
        let group_aliases = if kerberos.add_group_aliases {
            resolved
                .groups
                .into_iter()
                .map(|name| Alias { name })
                .collect()
        } else {
            Vec::new()
        };

        info!(
            principal = %principal,
            policies = ?policies,
            ttl_secs = ttl.num_seconds(),
            "login succeeded"
        );

        Grant {
            principal: principal.to_string(),
            policies,
            metadata: metadata(&username, principal.realm()),
            lease_duration: duration_secs(ttl),
            max_lease_duration: duration_secs(snapshot.ttl().max_ttl()),
            renewable: true,
            alias: Alias { name: username },
            group_aliases,
            response_token,
        }
    }

    /// Renews a grant for the principal proven by the request's token.
    ///
    /// A missing token yields the initial challenge. `username` and `realm`
    /// may be left empty; when present they must name the authenticated
    /// principal.
    pub async fn renew_authenticated(&self, request: &RenewRequest) -> AuthOutcome {
        let header = request.authorization.as_deref().unwrap_or_default();
        let token = match decode_authorization(header) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("renewal without negotiation token, sending initial challenge");
                return AuthOutcome::Continue { challenge: None };
            },
            Err(e) => return AuthOutcome::Failure(e.into()),
        };
        let Some(snapshot) = self.config.snapshot() else {
            return AuthOutcome::Failure(AuthError::NotConfigured);
        };

        let (principal, response_token) = match self.validator.validate(&token, snapshot.identity()) {
            ValidationOutcome::Established {
                principal,
                response_token,
            } => (principal, response_token),
            ValidationOutcome::Continue(challenge) => {
                return AuthOutcome::Continue {
                    challenge: Some(challenge),
                }
            },
            ValidationOutcome::Rejected(e) => return AuthOutcome::Failure(e.into()),
        };

        let username = username_for(&principal, snapshot.kerberos().remove_instance_name);
        let claimed_other_user = !request.username.is_empty() && request.username != username;
        let claimed_other_realm = !request.realm.is_empty() && request.realm != principal.realm();
        if claimed_other_user || claimed_other_realm {
            return AuthOutcome::Failure(AuthError::PrincipalMismatch {
                claimed: format!("{}@{}", request.username, request.realm),
                authenticated: principal.to_string(),
            });
        }

        let proven = RenewRequest {
            authorization: None,
            username,
            realm: principal.realm().to_string(),
            policies: request.policies.clone(),
        };
        match self.renew_with(&snapshot, &proven).await {
            Ok(grant) => AuthOutcome::Success(Grant {
                principal: principal.to_string(),
                response_token,
                ..grant
            }),
            Err(e) => AuthOutcome::Failure(e),
        }
    }

    /// Re-resolves the groups of an existing grant and extends it.
    ///
    /// The caller vouches for `username` and `realm`; the token in
    /// `authorization` is not consulted.
    ///
    /// # Errors
    ///
    /// Refuses the renewal when the resolved policies no longer match.
    pub async fn renew(&self, request: &RenewRequest) -> Result<Grant, AuthError> {
        let snapshot = self.config.snapshot().ok_or(AuthError::NotConfigured)?;
        if request.username.is_empty() {
            return Err(AuthError::InvalidRequest("username is required".to_string()));
        }
        self.renew_with(&snapshot, request).await
    }

    async fn renew_with(&self, snapshot: &ConfigSnapshot, request: &RenewRequest) -> Result<Grant, AuthError> {
        let resolved = self
            .resolver
            .resolve(&request.username, snapshot.ldap(), snapshot.groups())
            .await?;
        let policies = merge_policies(&snapshot.kerberos().token_policies, &resolved.policies);

        let current: Vec<String> = request
            .policies
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if policies != current {
            debug!(
                user = %request.username,
                current = ?current,
                resolved = ?policies,
                "policies changed since login"
            );
            return Err(AuthError::PoliciesChanged);
        }

        let ttl = snapshot.ttl().default_ttl();
        info!(user = %request.username, ttl_secs = ttl.num_seconds(), "lease renewed");

        let principal = if request.realm.is_empty() {
            request.username.clone()
        } else {
            format!("{}@{}", request.username, request.realm)
        };
        let kerberos = snapshot.kerberos();
        let group_aliases = if kerberos.add_group_aliases {
            resolved
                .groups
                .into_iter()
                .map(|name| Alias { name })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Grant {
            principal,
            policies,
            metadata: metadata(&request.username, &request.realm),
            lease_duration: duration_secs(ttl),
            max_lease_duration: duration_secs(snapshot.ttl().max_ttl()),
            renewable: true,
            alias: Alias {
                name: request.username.clone(),
            },
            group_aliases,
            response_token: None,
        })
    }
}

#[async_trait]
impl LoginBackend for LoginOrchestrator {
    async fn login(&self, request: LoginRequest) -> AuthOutcome {
        LoginOrchestrator::login(self, &request).await
    }

    async fn renew(&self, request: RenewRequest) -> AuthOutcome {
        self.renew_authenticated(&request).await
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn name(&self) -> &'static str {
        "kerberos"
    }
}

/// Username presented to the directory and the host.
fn username_for(principal: &VerifiedPrincipal, remove_instance_name: bool) -> String {
    match principal.components().first() {
        Some(first) if remove_instance_name => first.clone(),
        _ => principal.name(),
    }
}

fn merge_policies(configured: &[String], mapped: &BTreeSet<String>) -> Vec<String> {
    configured
        .iter()
        .chain(mapped.iter())
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn metadata(user: &str, domain: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("user".to_string(), user.to_string()),
        ("domain".to_string(), domain.to_string()),
    ])
}
