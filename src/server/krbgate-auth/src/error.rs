//! Authentication error types.
//!
//! [`AuthError`] keeps the full internal reason. [`AuthError::kind`] is
//! what the transport boundary looks at to pick a response class.

use krbgate_spnego::ValidationError;
use krbgate_storage::StorageError;
use thiserror::Error;

/// Externally visible class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials were not accepted (401).
    Authentication,
    /// The request itself is invalid (400).
    InvalidRequest,
    /// Infrastructure or configuration failure (500).
    Internal,
}

/// Errors that can occur during login and renewal.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The negotiation token was malformed or failed verification.
    #[error("authentication failed: {0}")]
    Authentication(#[from] ValidationError),

    /// The requested TTL could not be parsed.
    #[error("invalid ttl format: {0}")]
    InvalidTtl(TtlError),

    /// The request is invalid for another reason.
    #[error("{0}")]
    InvalidRequest(String),

    /// A renewal named a principal other than the authenticated one.
    #[error("renewal for {claimed} presented a ticket for {authenticated}")]
    PrincipalMismatch {
        /// Principal named in the request.
        claimed: String,
        /// Principal proven by the token.
        authenticated: String,
    },

    /// Renewal refused because the resolved policies differ.
    #[error("policies have changed, not renewing")]
    PoliciesChanged,

    /// The directory could not be queried.
    #[error("directory unavailable: {0}")]
    Directory(#[from] DirectoryError),

    /// The stored configuration is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No configuration has been published yet.
    #[error("kerberos backend is not configured")]
    NotConfigured,
}

impl AuthError {
    /// Response class for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) | Self::PrincipalMismatch { .. } => ErrorKind::Authentication,
            Self::InvalidTtl(_) | Self::InvalidRequest(_) | Self::PoliciesChanged => {
                ErrorKind::InvalidRequest
            },
            Self::Directory(_) | Self::Config(_) | Self::NotConfigured => ErrorKind::Internal,
        }
    }
}

impl From<TtlError> for AuthError {
    fn from(err: TtlError) -> Self {
        match err {
            TtlError::Negative => Self::InvalidRequest(err.to_string()),
            other => Self::InvalidTtl(other),
        }
    }
}

/// TTL parsing and policy errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtlError {
    /// The string is not a duration at all.
    #[error("invalid duration {0:?}")]
    Invalid(String),

    /// A quantity has no unit.
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    /// A unit is not one of ns, us, µs, ms, s, m, h.
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit {
        /// Offending unit text.
        unit: String,
        /// Full input.
        input: String,
    },

    /// The duration does not fit in 64-bit nanoseconds.
    #[error("duration {0:?} overflows")]
    Overflow(String),

    /// A negative TTL was requested.
    #[error("ttl must not be negative")]
    Negative,
}

/// Directory capability errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No server could be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The service bind was refused.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The search failed or returned an unusable result.
    #[error("search failed: {0}")]
    Search(String),

    /// The exchange exceeded the request timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required record is absent.
    #[error("missing record: {0}")]
    Missing(&'static str),

    /// A record holds an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Storage could not be read.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            field,
            reason: reason.to_string(),
        }
    }
}
