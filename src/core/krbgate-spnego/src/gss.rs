//! GSS-API token framing (RFC 2743 §3.1, RFC 4121 §4.1).

use std::borrow::Cow;

use asn1_rs::{Class, Header, Oid, Tag};
use der_parser::der::parse_der_container;

use crate::der::{decode, decode_all, encode};
use crate::error::DerError;

/// SPNEGO mechanism, 1.3.6.1.5.5.2.
pub const OID_SPNEGO: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

/// Kerberos v5 mechanism, 1.2.840.113554.1.2.2.
pub const OID_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];

/// Legacy Microsoft Kerberos v5 mechanism, 1.2.840.48018.1.2.2.
pub const OID_MS_KRB5: &[u8] = &[0x2a, 0x86, 0x48, 0x82, 0xf7, 0x12, 0x01, 0x02, 0x02];

/// NTLMSSP, 1.3.6.1.4.1.311.2.2.10.
pub const OID_NTLM: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

/// krb5 inner token identifier for AP-REQ.
pub const TOK_ID_AP_REQ: [u8; 2] = [0x01, 0x00];

/// krb5 inner token identifier for AP-REP.
pub const TOK_ID_AP_REP: [u8; 2] = [0x02, 0x00];

/// Returns true for either Kerberos mechanism OID.
pub fn is_kerberos(oid: &[u8]) -> bool {
    oid == OID_KRB5 || oid == OID_MS_KRB5
}

/// Dotted rendering of an encoded OID, for log lines.
pub fn oid_to_string(content: &[u8]) -> String {
    Oid::new(Cow::Borrowed(content)).to_id_string()
}

/// An `InitialContextToken`: mechanism OID plus the mechanism specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextToken<'a> {
    /// Encoded mechanism OID content.
    pub mech: &'a [u8],
    /// Bytes following the OID.
    pub inner: &'a [u8],
}

impl<'a> InitialContextToken<'a> {
    /// Parses the `[APPLICATION 0]` framing.
    pub fn parse(data: &'a [u8]) -> Result<Self, DerError> {
        // the body after the OID is mechanism defined, not DER
        decode_all(
            data,
            "GSS token",
            parse_der_container(|body: &'a [u8], hdr: Header<'a>| {
                hdr.assert_class(Class::Application)?;
                hdr.assert_tag(Tag(0))?;
                hdr.assert_constructed()?;
                let (inner, mech) = decode::oid(body)?;
                Ok((&b""[..], Self { mech, inner }))
            }),
        )
    }
}

/// Frames `inner` with the `[APPLICATION 0]` header for `mech`.
pub fn wrap(mech: &[u8], inner: &[u8]) -> Result<Vec<u8>, DerError> {
    let mut body = encode::oid(mech)?;
    body.extend_from_slice(inner);
    encode::application(0, body)
}

/// Frames a Kerberos message as a krb5 GSS token with the given TOK_ID.
pub fn wrap_krb5(tok_id: [u8; 2], message: &[u8]) -> Result<Vec<u8>, DerError> {
    let mut inner = Vec::with_capacity(message.len() + 2);
    inner.extend_from_slice(&tok_id);
    inner.extend_from_slice(message);
    wrap(OID_KRB5, &inner)
}

/// Strips the TOK_ID from a krb5 mechanism body.
pub fn split_krb5(inner: &[u8], expected: [u8; 2]) -> Result<&[u8], DerError> {
    match inner.split_first_chunk::<2>() {
        Some((tok_id, rest)) if *tok_id == expected => Ok(rest),
        Some((tok_id, _)) => Err(DerError::new(format!(
            "unexpected krb5 TOK_ID {:02x}{:02x}",
            tok_id[0], tok_id[1]
        ))),
        None => Err(DerError::new("krb5 token too short")),
    }
}
