//! # krbgate Auth
//!
//! Kerberos/SPNEGO login backend.
//!
//! A login presents a negotiation token. The token is verified against the
//! service keytab, the principal's groups are read from LDAP and mapped to
//! policies, and the requested TTL is bounded by the configured policy.
//!
//! ## Modules
//!
//! - [`ttl`]: duration parsing and TTL bounds
//! - [`config`]: stored records and the published snapshot
//! - [`groups`]: directory group resolution
//! - [`login`]: the login state machine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod groups;
pub mod ldap;
pub mod login;
pub mod ttl;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backend::LoginBackend;
pub use config::{ConfigSnapshot, ConfigStore, GroupEntry, KerberosConfig, LdapConfig};
pub use context::{Alias, AuthOutcome, Grant, LoginReply};
pub use directory::{Directory, DirectoryEntry, DirectorySession};
pub use error::{AuthError, ConfigError, DirectoryError, ErrorKind, TtlError};
pub use groups::{GroupMapping, GroupResolver, ResolvedGroups};
pub use ldap::LdapDirectory;
pub use login::{LoginOrchestrator, LoginRequest, LoginState, RenewRequest};
pub use ttl::{parse_ttl, TtlPolicy};
