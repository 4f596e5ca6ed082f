//! Login results and their mapping to the transport boundary.

use std::collections::BTreeMap;

use chrono::Duration;
use krbgate_spnego::ChallengeToken;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{AuthError, ErrorKind};

/// Identity alias reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Alias name.
    pub name: String,
}

/// Policies and lease granted to an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Full principal, `name@REALM`.
    pub principal: String,
    /// Policies, sorted and de-duplicated.
    pub policies: Vec<String>,
    /// `user` and `domain` of the principal.
    pub metadata: BTreeMap<String, String>,
    /// Effective TTL in seconds.
    pub lease_duration: u64,
    /// Maximum TTL in seconds.
    pub max_lease_duration: u64,
    /// Whether the lease may be renewed.
    pub renewable: bool,
    /// Entity alias.
    pub alias: Alias,
    /// Directory groups as aliases.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_aliases: Vec<Alias>,
    /// Acceptor token for the client, sent in `WWW-Authenticate`.
    #[serde(skip)]
    pub response_token: Option<Vec<u8>>,
}

impl Grant {
    /// Username from the metadata.
    pub fn username(&self) -> &str {
        self.metadata.get("user").map(String::as_str).unwrap_or_default()
    }

    /// Realm from the metadata.
    pub fn realm(&self) -> &str {
        self.metadata.get("domain").map(String::as_str).unwrap_or_default()
    }
}

/// Whole seconds of a lease, rounded up so a positive TTL never reports 0.
pub(crate) fn duration_secs(d: Duration) -> u64 {
    if d <= Duration::zero() {
        return 0;
    }
    let secs = u64::try_from(d.num_seconds()).unwrap_or_default();
    if d > Duration::seconds(d.num_seconds()) {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Result of one login attempt.
#[derive(Debug)]
pub enum AuthOutcome {
    /// The principal is authenticated and granted policies.
    Success(Grant),
    /// The client must (re)submit a token, optionally answering a
    /// continuation token.
    Continue {
        /// Continuation artifact, absent for the initial challenge.
        challenge: Option<ChallengeToken>,
    },
    /// The attempt failed; the reason stays internal.
    Failure(AuthError),
}

/// What the transport sends back.
///
/// Authentication failures of every kind collapse into
/// [`LoginReply::Unauthorized`] without a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    /// 200 with the grant.
    Granted(Grant),
    /// 401 with `WWW-Authenticate: Negotiate[ token]`.
    Unauthorized {
        /// Continuation token to append to the challenge.
        challenge: Option<Vec<u8>>,
    },
    /// 400 with a caller-facing message.
    BadRequest(String),
    /// 500; details are only logged.
    Internal,
}

impl AuthOutcome {
    /// Maps the outcome onto the transport reply, logging internal detail.
    pub fn into_reply(self) -> LoginReply {
        match self {
            Self::Success(grant) => LoginReply::Granted(grant),
            Self::Continue { challenge } => LoginReply::Unauthorized {
                challenge: challenge.map(|c| c.as_bytes().to_vec()),
            },
            Self::Failure(err) => err.into_reply(),
        }
    }
}

impl AuthError {
    /// Maps an error onto the transport reply, logging internal detail.
    pub fn into_reply(self) -> LoginReply {
        match self.kind() {
            ErrorKind::Authentication => {
                warn!(reason = %self, "login rejected");
                LoginReply::Unauthorized { challenge: None }
            },
            ErrorKind::InvalidRequest => LoginReply::BadRequest(self.to_string()),
            ErrorKind::Internal => {
                error!(error = %self, "login failed");
                LoginReply::Internal
            },
        }
    }
}
