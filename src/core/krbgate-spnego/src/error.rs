//! Token validation error types.

use krbgate_crypto::CryptoError;
use thiserror::Error;

/// Structural DER decoding failure.
#[derive(Debug, Clone, Error)]
#[error("DER: {message}")]
pub struct DerError {
    message: String,
}

impl DerError {
    /// Creates a decoding error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Reasons a negotiation token was not accepted.
///
/// These stay internal: callers log them and collapse every variant into a
/// single authentication failure at the transport boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The token could not be decoded or parsed.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The negotiation does not offer Kerberos.
    #[error("no supported mechanism offered")]
    UnsupportedMechanism,

    /// The ticket was issued for a principal this service has no key for.
    #[error("ticket issued for unexpected service {principal}")]
    WrongService {
        /// Server principal named in the ticket.
        principal: String,
    },

    /// The keytab holds the service principal but not the required key.
    #[error("no key for etype {etype} kvno {kvno:?}")]
    NoMatchingKey {
        /// Encryption type of the ticket.
        etype: i32,
        /// Key version of the ticket, when present.
        kvno: Option<u32>,
    },

    /// The ticket uses an encryption type this service does not implement.
    #[error("unsupported encryption type {0}")]
    UnsupportedEncryptionType(i32),

    /// Decryption or checksum verification failed.
    #[error("integrity check failed for {0}")]
    IntegrityCheckFailed(&'static str),

    /// The decrypted ticket contents are unusable.
    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    /// The authenticator names a different client than the ticket.
    #[error("authenticator client does not match ticket client")]
    ClientMismatch,

    /// The ticket carries the INVALID flag.
    #[error("ticket is flagged invalid")]
    TicketInvalid,

    /// The ticket start time is in the future.
    #[error("ticket not yet valid")]
    TicketNotYetValid,

    /// The ticket end time has passed.
    #[error("ticket expired")]
    TicketExpired,

    /// The authenticator timestamp is outside the allowed clock skew.
    #[error("authenticator outside clock skew")]
    ClockSkew,

    /// The service identity itself is unusable.
    #[error("service identity: {0}")]
    Identity(String),

    /// The reply token could not be encoded.
    #[error("reply encoding failed: {0}")]
    Encoding(String),
}

impl ValidationError {
    /// True when the token could not be decoded at all, as opposed to a
    /// well-formed token that failed verification.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<DerError> for ValidationError {
    fn from(err: DerError) -> Self {
        Self::Malformed(err.message)
    }
}

impl ValidationError {
    pub(crate) fn encoding(err: DerError) -> Self {
        Self::Encoding(err.message)
    }
}

impl From<CryptoError> for ValidationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnsupportedEncryptionType(id) => Self::UnsupportedEncryptionType(id),
            other => Self::Identity(other.to_string()),
        }
    }
}
