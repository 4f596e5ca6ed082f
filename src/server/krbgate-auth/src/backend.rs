//! Login backend trait.

use async_trait::async_trait;

use crate::context::AuthOutcome;
use crate::login::{LoginRequest, RenewRequest};

/// Trait for login backends mounted by the HTTP surface.
///
/// [`crate::LoginOrchestrator`] is the Kerberos implementation.
#[async_trait]
pub trait LoginBackend: Send + Sync {
    /// Runs one login attempt.
    ///
    /// # Arguments
    ///
    /// * `request` - The `Authorization` value and the requested TTL
    ///
    /// # Returns
    ///
    /// * `AuthOutcome::Success` - The principal is authenticated
    /// * `AuthOutcome::Continue` - The client must send a (new) token
    /// * `AuthOutcome::Failure` - The attempt failed
    async fn login(&self, request: LoginRequest) -> AuthOutcome;

    /// Renews the grant of the principal proven by the request's token,
    /// if its policies are unchanged.
    ///
    /// # Returns
    ///
    /// * `AuthOutcome::Success` - The renewed grant
    /// * `AuthOutcome::Continue` - The client must send a (new) token
    /// * `AuthOutcome::Failure` - The renewal was refused
    async fn renew(&self, request: RenewRequest) -> AuthOutcome;

    /// Returns true when the backend can serve logins.
    fn is_configured(&self) -> bool;

    /// Returns the name of this backend for logging/debugging.
    fn name(&self) -> &'static str;
}
