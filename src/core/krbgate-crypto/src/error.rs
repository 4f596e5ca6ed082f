//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during Kerberos cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption type is not implemented.
    #[error("unsupported encryption type: {0}")]
    UnsupportedEncryptionType(i32),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption or integrity verification failed.
    ///
    /// Deliberately carries no detail about which step failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Keytab could not be parsed.
    #[error("malformed keytab: {0}")]
    MalformedKeytab(String),
}
