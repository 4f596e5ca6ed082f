//! # krbgate SPNEGO
//!
//! Verification of SPNEGO and Kerberos negotiation tokens presented by
//! HTTP clients (RFC 4559).
//!
//! The crate understands just enough of GSS-API, SPNEGO (RFC 4178) and
//! Kerberos v5 (RFC 4120) to act as an acceptor:
//! - classify an incoming token and pick the Kerberos mechanism
//! - decrypt the service ticket with the service account's keytab
//! - verify the authenticator and the ticket validity window
//! - build the acceptor reply, including an AP-REP for mutual authentication
//!
//! ## Example
//!
//! ```ignore
//! use krbgate_spnego::{decode_authorization, ServiceIdentity, TokenValidator, ValidationOutcome};
//!
//! let identity = ServiceIdentity::from_parts(keytab, "HTTP/vault.example.com")?;
//! let token = decode_authorization(header)?.unwrap_or_default();
//! match TokenValidator::new().validate(&token, &identity) {
//!     ValidationOutcome::Established { principal, .. } => println!("hello {principal}"),
//!     ValidationOutcome::Continue(challenge) => { /* 401 with challenge */ }
//!     ValidationOutcome::Rejected(reason) => { /* 401 */ }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod der;
pub mod error;
pub mod gss;
pub mod identity;
pub mod messages;
pub mod negotiate;
pub mod token;
pub mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{DerError, ValidationError};
pub use identity::{ServiceIdentity, ServicePrincipal};
pub use token::{challenge_header, decode_authorization, NEGOTIATE};
pub use validator::{ChallengeToken, TokenValidator, ValidationOutcome, VerifiedPrincipal};
