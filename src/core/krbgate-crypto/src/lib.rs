//! # krbgate Crypto
//!
//! Kerberos key material and encryption profiles for krbgate.
//!
//! This crate provides the low-level operations needed to verify Kerberos
//! tickets presented to a service:
//! - AES-CTS with HMAC-SHA1-96 (RFC 3962)
//! - AES-CTS with HMAC-SHA256-128 / HMAC-SHA384-192 (RFC 8009)
//! - Password based string-to-key (PBKDF2)
//! - MIT keytab parsing and writing
//! - Secure random generation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod aes_cts;
pub mod error;
pub mod etype;
pub mod keys;
pub mod keytab;
pub mod nfold;
mod profile;
pub mod random;
pub mod string_to_key;

pub use error::CryptoError;
pub use etype::EncryptionType;
pub use keys::EncryptionKey;
pub use keytab::{Keytab, KeytabEntry};
pub use profile::CONFOUNDER_SIZE;

/// Key usage numbers from RFC 4120 section 7.5.1.
pub mod key_usage {
    /// Ticket `enc-part`, encrypted with the service key.
    pub const TICKET: u32 = 2;
    /// AP-REQ authenticator, encrypted with the ticket session key.
    pub const AP_REQ_AUTHENTICATOR: u32 = 11;
    /// AP-REP `enc-part`, encrypted with the ticket session key.
    pub const AP_REP_ENC_PART: u32 = 12;
}
