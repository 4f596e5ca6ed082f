//! SPNEGO negotiation tokens (RFC 4178).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use asn1_rs::{Class, Tag};
use der_parser::der::parse_der_sequence_of_v;
use der_parser::error::{BerError, BerResult};
use der_parser::nom;

use crate::der::{self, decode, decode_all, encode};
use crate::error::DerError;
use crate::gss::{self, InitialContextToken};

/// `negState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegState {
    /// The context is established.
    AcceptCompleted,
    /// Another round trip is required.
    AcceptIncomplete,
    /// The negotiation failed.
    Reject,
    /// The acceptor asks for a mechListMIC.
    RequestMic,
}

impl NegState {
    fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::AcceptCompleted),
            1 => Some(Self::AcceptIncomplete),
            2 => Some(Self::Reject),
            3 => Some(Self::RequestMic),
            _ => None,
        }
    }

    fn value(self) -> u32 {
        match self {
            Self::AcceptCompleted => 0,
            Self::AcceptIncomplete => 1,
            Self::Reject => 2,
            Self::RequestMic => 3,
        }
    }

    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        let (rest, value) = decode::enumerated(i)?;
        match Self::from_value(value) {
            Some(state) => Ok((rest, state)),
            None => Err(nom::Err::Error(BerError::invalid_value(
                Tag::Enumerated,
                format!("unknown negState {value}"),
            ))),
        }
    }
}

/// Initiator's first SPNEGO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegTokenInit<'a> {
    /// Offered mechanisms in preference order.
    pub mech_types: Vec<&'a [u8]>,
    /// Optimistic token for the first mechanism.
    pub mech_token: Option<&'a [u8]>,
}

impl<'a> NegTokenInit<'a> {
    /// Parses the `[0]` choice body that follows the SPNEGO OID.
    pub fn parse(data: &'a [u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "NegTokenInit",
            decode::explicit(
                0,
                decode::sequence(|i| {
                    let (i, mech_types) =
                        decode::explicit(0, parse_der_sequence_of_v(decode::oid))(i)?;
                    // reqFlags are advisory and ignored
                    let (i, _) = decode::optional_explicit(1, decode::skip)(i)?;
                    let (i, mech_token) = decode::optional_explicit(2, decode::octet_string)(i)?;
                    Ok((
                        i,
                        Self {
                            mech_types,
                            mech_token,
                        },
                    ))
                }),
            ),
        )
    }

    /// True when any Kerberos mechanism is offered.
    pub fn offers_kerberos(&self) -> bool {
        self.mech_types.iter().any(|m| gss::is_kerberos(m))
    }

    /// True when the initiator prefers Kerberos.
    pub fn prefers_kerberos(&self) -> bool {
        self.mech_types.first().is_some_and(|m| gss::is_kerberos(m))
    }

    /// Encodes as a complete GSS `InitialContextToken`.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        let mechs = self
            .mech_types
            .iter()
            .map(|m| encode::oid(m))
            .collect::<Result<Vec<_>, _>>()?;
        let mut fields = vec![encode::explicit(0, encode::sequence(mechs)?)?];
        if let Some(token) = self.mech_token {
            fields.push(encode::explicit(2, encode::octet_string(token)?)?);
        }
        gss::wrap(gss::OID_SPNEGO, &encode::explicit(0, encode::sequence(fields)?)?)
    }
}

/// Acceptor replies and initiator follow-ups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NegTokenResp<'a> {
    /// Negotiation state.
    pub neg_state: Option<NegState>,
    /// Mechanism selected by the acceptor.
    pub supported_mech: Option<&'a [u8]>,
    /// Mechanism token.
    pub response_token: Option<&'a [u8]>,
    /// MIC over the mechanism list.
    pub mech_list_mic: Option<&'a [u8]>,
}

impl<'a> NegTokenResp<'a> {
    /// Reply that completes the exchange.
    pub fn accept_completed(supported_mech: Option<&'a [u8]>, response_token: Option<&'a [u8]>) -> Self {
        Self {
            neg_state: Some(NegState::AcceptCompleted),
            supported_mech,
            response_token,
            mech_list_mic: None,
        }
    }

    /// Reply that asks the initiator to continue with Kerberos.
    pub fn accept_incomplete() -> Self {
        Self {
            neg_state: Some(NegState::AcceptIncomplete),
            supported_mech: Some(gss::OID_KRB5),
            response_token: None,
            mech_list_mic: None,
        }
    }

    /// Parses a `[1]`-tagged NegTokenResp.
    pub fn parse(data: &'a [u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "NegTokenResp",
            decode::explicit(
                1,
                decode::sequence(|i| {
                    let (i, neg_state) = decode::optional_explicit(0, NegState::parse)(i)?;
                    let (i, supported_mech) = decode::optional_explicit(1, decode::oid)(i)?;
                    let (i, response_token) = decode::optional_explicit(2, decode::octet_string)(i)?;
                    let (i, mech_list_mic) = decode::optional_explicit(3, decode::octet_string)(i)?;
                    Ok((
                        i,
                        Self {
                            neg_state,
                            supported_mech,
                            response_token,
                            mech_list_mic,
                        },
                    ))
                }),
            ),
        )
    }

    /// Encodes with the `[1]` choice tag.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        let mut fields = Vec::new();
        if let Some(state) = self.neg_state {
            fields.push(encode::explicit(0, encode::enumerated(state.value())?)?);
        }
        if let Some(mech) = self.supported_mech {
            fields.push(encode::explicit(1, encode::oid(mech)?)?);
        }
        if let Some(token) = self.response_token {
            fields.push(encode::explicit(2, encode::octet_string(token)?)?);
        }
        if let Some(mic) = self.mech_list_mic {
            fields.push(encode::explicit(3, encode::octet_string(mic)?)?);
        }
        encode::explicit(1, encode::sequence(fields)?)
    }

    /// Encodes and base64-encodes for an HTTP header.
    pub fn to_base64(&self) -> Result<String, DerError> {
        Ok(BASE64.encode(self.encode()?))
    }
}

/// Kerberos message extracted from a token, with the framing it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KerberosToken<'a> {
    /// Encoded AP-REQ.
    pub ap_req: &'a [u8],
    /// True when the AP-REQ was inside a krb5 GSS token.
    pub framed: bool,
}

impl<'a> KerberosToken<'a> {
    /// Extracts an AP-REQ from a krb5 GSS token or a bare message.
    pub fn parse(data: &'a [u8]) -> Result<Self, DerError> {
        match der::peek(data) {
            Some((Class::Application, Tag(0))) => {
                let token = InitialContextToken::parse(data)?;
                if !gss::is_kerberos(token.mech) {
                    return Err(DerError::new(format!(
                        "expected krb5 mechanism, found {}",
                        gss::oid_to_string(token.mech)
                    )));
                }
                Ok(Self {
                    ap_req: gss::split_krb5(token.inner, gss::TOK_ID_AP_REQ)?,
                    framed: true,
                })
            },
            Some((Class::Application, Tag(14))) => Ok(Self {
                ap_req: data,
                framed: false,
            }),
            _ => Err(DerError::new("not a Kerberos token")),
        }
    }
}

/// A decoded negotiation token, classified by its outer framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingToken<'a> {
    /// SPNEGO first leg.
    Init(NegTokenInit<'a>),
    /// SPNEGO follow-up leg.
    Resp(NegTokenResp<'a>),
    /// Raw Kerberos, without SPNEGO.
    Kerberos(KerberosToken<'a>),
}

/// Outcome of looking at a token's mechanism before decoding its body.
#[derive(Debug)]
pub enum ClassifyError {
    /// The bytes are not a token at all.
    Malformed(DerError),
    /// A well-formed GSS token for a mechanism other than SPNEGO or Kerberos.
    UnsupportedMechanism(String),
}

impl From<DerError> for ClassifyError {
    fn from(err: DerError) -> Self {
        Self::Malformed(err)
    }
}

impl<'a> IncomingToken<'a> {
    /// Classifies raw token bytes.
    pub fn classify(data: &'a [u8]) -> Result<Self, ClassifyError> {
        match der::peek(data) {
            Some((Class::Application, Tag(0))) => {
                let token = InitialContextToken::parse(data)?;
                if token.mech == gss::OID_SPNEGO {
                    Ok(Self::Init(NegTokenInit::parse(token.inner)?))
                } else if gss::is_kerberos(token.mech) {
                    Ok(Self::Kerberos(KerberosToken {
                        ap_req: gss::split_krb5(token.inner, gss::TOK_ID_AP_REQ)?,
                        framed: true,
                    }))
                } else {
                    Err(ClassifyError::UnsupportedMechanism(gss::oid_to_string(
                        token.mech,
                    )))
                }
            },
            Some((Class::ContextSpecific, Tag(1))) => Ok(Self::Resp(NegTokenResp::parse(data)?)),
            Some((Class::Application, Tag(14))) => Ok(Self::Kerberos(KerberosToken {
                ap_req: data,
                framed: false,
            })),
            Some((class, tag)) => Err(ClassifyError::Malformed(DerError::new(format!(
                "unrecognised token {class:?} {tag:?}"
            )))),
            None => Err(ClassifyError::Malformed(DerError::new("empty token"))),
        }
    }
}
