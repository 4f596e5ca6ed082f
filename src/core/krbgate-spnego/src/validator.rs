//! Token validation.
//!
//! [`TokenValidator`] accepts the first leg of a SPNEGO or raw Kerberos
//! exchange and verifies the enclosed AP-REQ against a [`ServiceIdentity`].
//! It keeps no state between calls: a token that needs another round trip
//! yields [`ValidationOutcome::Continue`] and the caller resubmits.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use krbgate_crypto::{key_usage, random, EncryptionKey};
use tracing::debug;

use crate::error::{DerError, ValidationError};
use crate::gss;
use crate::identity::ServiceIdentity;
use crate::messages::{
    ticket_flags, ApRep, ApReq, Authenticator, EncApRepPart, EncTicketPart, EncryptedData,
};
use crate::negotiate::{ClassifyError, IncomingToken, KerberosToken, NegTokenResp};

/// Allowed difference between client and service clocks, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// An authenticated client principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPrincipal {
    components: Vec<String>,
    realm: String,
}

impl VerifiedPrincipal {
    /// Creates a principal from its parts.
    pub fn new(components: Vec<String>, realm: impl Into<String>) -> Self {
        Self {
            components,
            realm: realm.into(),
        }
    }

    /// Name components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Components joined with `/`, without the realm.
    pub fn name(&self) -> String {
        self.components.join("/")
    }

    /// Client realm.
    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl fmt::Display for VerifiedPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.realm)
    }
}

/// Continuation artifact returned to the client for another round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken(Vec<u8>);

impl ChallengeToken {
    /// Encoded token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Result of validating one token.
#[derive(Debug)]
pub enum ValidationOutcome {
    /// The client is authenticated.
    Established {
        /// Client principal from the ticket.
        principal: VerifiedPrincipal,
        /// Token for the client to complete its side of the context.
        response_token: Option<Vec<u8>>,
    },
    /// The negotiation needs another leg.
    Continue(ChallengeToken),
    /// The token was not accepted.
    Rejected(ValidationError),
}

struct Verified {
    principal: VerifiedPrincipal,
    ap_rep: Option<Vec<u8>>,
}

/// Verifies negotiation tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    clock_skew: Duration,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self {
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
        }
    }
}

impl TokenValidator {
    /// Creates a validator with the default clock skew.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the allowed clock skew.
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Validates `token` against `identity` at the current time.
    pub fn validate(&self, token: &[u8], identity: &ServiceIdentity) -> ValidationOutcome {
        self.validate_at(token, identity, Utc::now())
    }

    /// Validates `token` against `identity` as of `now`.
    pub fn validate_at(
        &self,
        token: &[u8],
        identity: &ServiceIdentity,
        now: DateTime<Utc>,
    ) -> ValidationOutcome {
        let incoming = match IncomingToken::classify(token) {
            Ok(incoming) => incoming,
            Err(ClassifyError::Malformed(e)) => return ValidationOutcome::Rejected(e.into()),
            Err(ClassifyError::UnsupportedMechanism(oid)) => {
                debug!(mechanism = %oid, "GSS token for unsupported mechanism");
                return ValidationOutcome::Rejected(ValidationError::UnsupportedMechanism);
            },
        };

        match incoming {
            IncomingToken::Init(init) => {
                if !init.offers_kerberos() {
                    return ValidationOutcome::Rejected(ValidationError::UnsupportedMechanism);
                }
                let mech_token = match init.mech_token {
                    Some(t) if init.prefers_kerberos() => t,
                    _ => {
                        debug!("kerberos offered without optimistic token, requesting another leg");
                        return match NegTokenResp::accept_incomplete().encode() {
                            Ok(token) => ValidationOutcome::Continue(ChallengeToken(token)),
                            Err(e) => ValidationOutcome::Rejected(ValidationError::encoding(e)),
                        };
                    },
                };
                let supported = init.mech_types.first().copied();
                self.establish(mech_token, identity, now, |ap_rep| {
                    let wrapped = ap_rep
                        .map(|r| gss::wrap_krb5(gss::TOK_ID_AP_REP, &r))
                        .transpose()?;
                    NegTokenResp::accept_completed(supported, wrapped.as_deref())
                        .encode()
                        .map(Some)
                })
            },
            IncomingToken::Resp(resp) => {
                let Some(mech_token) = resp.response_token else {
                    return ValidationOutcome::Rejected(ValidationError::Malformed(
                        "NegTokenResp without responseToken".to_string(),
                    ));
                };
                self.establish(mech_token, identity, now, |ap_rep| {
                    let wrapped = ap_rep
                        .map(|r| gss::wrap_krb5(gss::TOK_ID_AP_REP, &r))
                        .transpose()?;
                    NegTokenResp::accept_completed(None, wrapped.as_deref())
                        .encode()
                        .map(Some)
                })
            },
            IncomingToken::Kerberos(krb) => self.verify_outcome(krb, identity, now, |ap_rep| {
                ap_rep
                    .map(|r| {
                        if krb.framed {
                            gss::wrap_krb5(gss::TOK_ID_AP_REP, &r)
                        } else {
                            Ok(r)
                        }
                    })
                    .transpose()
            }),
        }
    }

    fn establish(
        &self,
        mech_token: &[u8],
        identity: &ServiceIdentity,
        now: DateTime<Utc>,
        respond: impl FnOnce(Option<Vec<u8>>) -> Result<Option<Vec<u8>>, DerError>,
    ) -> ValidationOutcome {
        match KerberosToken::parse(mech_token) {
            Ok(krb) => self.verify_outcome(krb, identity, now, respond),
            Err(e) => ValidationOutcome::Rejected(e.into()),
        }
    }

    fn verify_outcome(
        &self,
        krb: KerberosToken<'_>,
        identity: &ServiceIdentity,
        now: DateTime<Utc>,
        respond: impl FnOnce(Option<Vec<u8>>) -> Result<Option<Vec<u8>>, DerError>,
    ) -> ValidationOutcome {
        let verified = match self.verify_ap_req(krb.ap_req, identity, now) {
            Ok(verified) => verified,
            Err(e) => return ValidationOutcome::Rejected(e),
        };
        match respond(verified.ap_rep) {
            Ok(response_token) => ValidationOutcome::Established {
                principal: verified.principal,
                response_token,
            },
            Err(e) => ValidationOutcome::Rejected(ValidationError::encoding(e)),
        }
    }

    fn verify_ap_req(
        &self,
        data: &[u8],
        identity: &ServiceIdentity,
        now: DateTime<Utc>,
    ) -> Result<Verified, ValidationError> {
        let req = ApReq::decode(data)?;
        let ticket = &req.ticket;

        let service_key = identity.service_key(
            &ticket.realm,
            &ticket.sname,
            ticket.enc_part.etype,
            ticket.enc_part.kvno,
        )?;

        let plain = service_key
            .decrypt(key_usage::TICKET, &ticket.enc_part.cipher)
            .map_err(|_| ValidationError::IntegrityCheckFailed("ticket"))?;
        let enc_ticket = EncTicketPart::decode(&plain)
            .map_err(|e| ValidationError::InvalidTicket(e.message().to_string()))?;
        let session_key = enc_ticket
            .key
            .to_key()
            .map_err(|e| ValidationError::InvalidTicket(format!("session key: {e}")))?;

        if req.authenticator.etype != session_key.etype().id() {
            return Err(ValidationError::IntegrityCheckFailed("authenticator"));
        }
        let plain = session_key
            .decrypt(key_usage::AP_REQ_AUTHENTICATOR, &req.authenticator.cipher)
            .map_err(|_| ValidationError::IntegrityCheckFailed("authenticator"))?;
        let authenticator = Authenticator::decode(&plain)
            .map_err(|e| ValidationError::InvalidTicket(format!("authenticator: {}", e.message())))?;

        if authenticator.cname.components != enc_ticket.cname.components
            || authenticator.crealm != enc_ticket.crealm
        {
            return Err(ValidationError::ClientMismatch);
        }

        self.check_times(&enc_ticket, &authenticator, now)?;

        let ap_rep = if req.mutual_required() {
            Some(build_ap_rep(&session_key, &authenticator)?)
        } else {
            None
        };

        Ok(Verified {
            principal: VerifiedPrincipal::new(enc_ticket.cname.components, enc_ticket.crealm),
            ap_rep,
        })
    }

    fn check_times(
        &self,
        ticket: &EncTicketPart,
        authenticator: &Authenticator,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if ticket.flags & ticket_flags::INVALID != 0 {
            return Err(ValidationError::TicketInvalid);
        }

        let start = ticket.starttime.unwrap_or(ticket.authtime);
        if start - self.clock_skew > now {
            return Err(ValidationError::TicketNotYetValid);
        }
        if ticket.endtime + self.clock_skew < now {
            return Err(ValidationError::TicketExpired);
        }
        if (authenticator.ctime - now).abs() > self.clock_skew {
            return Err(ValidationError::ClockSkew);
        }
        Ok(())
    }
}

fn build_ap_rep(
    session_key: &EncryptionKey,
    authenticator: &Authenticator,
) -> Result<Vec<u8>, ValidationError> {
    let part = EncApRepPart {
        ctime: authenticator.ctime,
        cusec: authenticator.cusec,
        subkey: None,
        seq_number: Some(random::generate_u32()),
    };
    let plain = part.encode().map_err(ValidationError::encoding)?;
    let enc_part = EncryptedData::seal(session_key, key_usage::AP_REP_ENC_PART, None, &plain)?;
    ApRep { enc_part }.encode().map_err(ValidationError::encoding)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::negotiate::{NegState, NegTokenInit};
    use crate::testing::{service_keytab, TicketForge, REALM, SERVICE_ACCOUNT};
    use krbgate_crypto::EncryptionType;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::from_parts(service_keytab(), SERVICE_ACCOUNT).unwrap()
    }

    fn now() -> DateTime<Utc> {
        chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn established(outcome: ValidationOutcome) -> (VerifiedPrincipal, Option<Vec<u8>>) {
        match outcome {
            ValidationOutcome::Established {
                principal,
                response_token,
            } => (principal, response_token),
            other => panic!("expected established, got {other:?}"),
        }
    }

    fn rejected(outcome: ValidationOutcome) -> ValidationError {
        match outcome {
            ValidationOutcome::Rejected(e) => e,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_spnego_token_establishes() {
        let token = TicketForge::new("alice").at(now()).spnego();
        let (principal, response) = established(TokenValidator::new().validate_at(&token, &identity(), now()));

        assert_eq!(principal.to_string(), format!("alice@{REALM}"));
        let response = response.unwrap();
        let resp = NegTokenResp::parse(&response).unwrap();
        assert_eq!(resp.neg_state, Some(NegState::AcceptCompleted));
        assert_eq!(resp.supported_mech, Some(gss::OID_KRB5));
        assert!(resp.response_token.is_none());
    }

    #[test]
    fn test_mutual_auth_returns_ap_rep() {
        let forge = TicketForge::new("alice").at(now()).mutual(true);
        let token = forge.spnego();
        let (_, response) = established(TokenValidator::new().validate_at(&token, &identity(), now()));

        let response = response.unwrap();
        let resp = NegTokenResp::parse(&response).unwrap();
        let framed = gss::InitialContextToken::parse(resp.response_token.unwrap()).unwrap();
        let ap_rep = ApRep::decode(gss::split_krb5(framed.inner, gss::TOK_ID_AP_REP).unwrap()).unwrap();

        let plain = forge
            .session_key()
            .decrypt(key_usage::AP_REP_ENC_PART, &ap_rep.enc_part.cipher)
            .unwrap();
        let part = EncApRepPart::decode(&plain).unwrap();
        assert_eq!(part.ctime, now());
    }

    #[test]
    fn test_raw_kerberos_forms() {
        let forge = TicketForge::new("bob").instance("admin").at(now());
        let validator = TokenValidator::new();

        let (principal, response) = established(validator.validate_at(&forge.krb5(), &identity(), now()));
        assert_eq!(principal.name(), "bob/admin");
        assert!(response.is_none());

        let (principal, _) = established(validator.validate_at(&forge.ap_req(), &identity(), now()));
        assert_eq!(principal.components(), ["bob", "admin"]);
    }

    #[test]
    fn test_second_leg_resp_token() {
        let forge = TicketForge::new("carol").at(now());
        let krb5 = forge.krb5();
        let resp = NegTokenResp {
            response_token: Some(krb5.as_slice()),
            ..Default::default()
        };
        let (principal, response) =
            established(TokenValidator::new().validate_at(&resp.encode().unwrap(), &identity(), now()));
        assert_eq!(principal.name(), "carol");
        assert!(response.is_some());
    }

    #[test]
    fn test_sha2_enctypes() {
        for etype in [
            EncryptionType::Aes128CtsHmacSha256128,
            EncryptionType::Aes256CtsHmacSha384192,
        ] {
            let token = TicketForge::new("alice").etype(etype).at(now()).spnego();
            established(TokenValidator::new().validate_at(&token, &identity(), now()));
        }
    }

    #[test]
    fn test_continue_when_kerberos_not_first() {
        let init = NegTokenInit {
            mech_types: vec![gss::OID_NTLM, gss::OID_KRB5],
            mech_token: Some(&b"NTLMSSP"[..]),
        };
        match TokenValidator::new().validate_at(&init.encode().unwrap(), &identity(), now()) {
            ValidationOutcome::Continue(token) => {
                let resp = NegTokenResp::parse(token.as_bytes()).unwrap();
                assert_eq!(resp.neg_state, Some(NegState::AcceptIncomplete));
                assert_eq!(resp.supported_mech, Some(gss::OID_KRB5));
            },
            other => panic!("expected continue, got {other:?}"),
        }
    }

    #[test]
    fn test_continue_without_mech_token() {
        let init = NegTokenInit {
            mech_types: vec![gss::OID_KRB5],
            mech_token: None,
        };
        assert!(matches!(
            TokenValidator::new().validate_at(&init.encode().unwrap(), &identity(), now()),
            ValidationOutcome::Continue(_)
        ));
    }

    #[test]
    fn test_ntlm_only_rejected() {
        let init = NegTokenInit {
            mech_types: vec![gss::OID_NTLM],
            mech_token: Some(&b"NTLMSSP"[..]),
        };
        let err = rejected(TokenValidator::new().validate_at(&init.encode().unwrap(), &identity(), now()));
        assert!(matches!(err, ValidationError::UnsupportedMechanism));
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_garbage_is_malformed() {
        for token in [&b"invalid"[..], &[0x60, 0x03, 0x06, 0x01][..], &[][..]] {
            let err = rejected(TokenValidator::new().validate_at(token, &identity(), now()));
            assert!(err.is_malformed(), "{err}");
        }
    }

    #[test]
    fn test_wrong_service_key_fails_integrity() {
        let other = EncryptionKey::generate(EncryptionType::Aes256CtsHmacSha196);
        let token = TicketForge::new("alice").service_key(other).at(now()).spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::IntegrityCheckFailed("ticket")));
    }

    #[test]
    fn test_foreign_realm_is_wrong_service() {
        let token = TicketForge::new("alice").realm("OTHER.COM").at(now()).spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::WrongService { .. }));
    }

    #[test]
    fn test_unknown_kvno() {
        let token = TicketForge::new("alice").kvno(Some(42)).at(now()).spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::NoMatchingKey { .. }));
    }

    #[test]
    fn test_expired_ticket() {
        let issued = now() - Duration::hours(11);
        let token = TicketForge::new("alice").at(issued).authenticator_time(now()).spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::TicketExpired));
    }

    #[test]
    fn test_postdated_ticket_not_yet_valid() {
        let token = TicketForge::new("alice")
            .at(now() + Duration::hours(1))
            .authenticator_time(now())
            .spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::TicketNotYetValid));
    }

    #[test]
    fn test_clock_skew() {
        let token = TicketForge::new("alice")
            .at(now())
            .authenticator_time(now() - Duration::minutes(6))
            .spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::ClockSkew));

        let token = TicketForge::new("alice")
            .at(now())
            .authenticator_time(now() - Duration::minutes(4))
            .spnego();
        established(TokenValidator::new().validate_at(&token, &identity(), now()));
    }

    #[test]
    fn test_invalid_flag() {
        let token = TicketForge::new("alice")
            .at(now())
            .ticket_flags(ticket_flags::INVALID)
            .spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::TicketInvalid));
    }

    #[test]
    fn test_authenticator_client_mismatch() {
        let token = TicketForge::new("alice")
            .at(now())
            .authenticator_client("mallory")
            .spnego();
        let err = rejected(TokenValidator::new().validate_at(&token, &identity(), now()));
        assert!(matches!(err, ValidationError::ClientMismatch));
    }
}
