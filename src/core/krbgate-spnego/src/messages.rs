//! Kerberos v5 messages exchanged during AP authentication (RFC 4120 §5).

use asn1_rs::Tag;
use chrono::{DateTime, Utc};
use der_parser::der::{parse_der_i32, parse_der_i64, parse_der_sequence_of_v, parse_der_u32};
use der_parser::error::{BerError, BerResult};
use der_parser::nom;
use krbgate_crypto::{CryptoError, EncryptionKey, EncryptionType};
use zeroize::Zeroizing;

use crate::der::{decode, decode_all, encode};
use crate::error::DerError;

/// Protocol version number carried by every message.
pub const PVNO: i64 = 5;

/// `msg-type` of KRB_AP_REQ.
pub const MSG_TYPE_AP_REQ: i64 = 14;

/// `msg-type` of KRB_AP_REP.
pub const MSG_TYPE_AP_REP: i64 = 15;

const fn flag(bit: u32) -> u32 {
    1 << (31 - bit)
}

/// AP option bits.
pub mod ap_options {
    /// The ticket is encrypted in the session key of a TGT.
    pub const USE_SESSION_KEY: u32 = super::flag(1);
    /// The client requests an AP-REP.
    pub const MUTUAL_REQUIRED: u32 = super::flag(2);
}

/// Ticket flag bits.
pub mod ticket_flags {
    /// Ticket may be forwarded.
    pub const FORWARDABLE: u32 = super::flag(1);
    /// Ticket was postdated and must be validated by the KDC first.
    pub const INVALID: u32 = super::flag(7);
    /// Ticket is renewable.
    pub const RENEWABLE: u32 = super::flag(8);
    /// Client was pre-authenticated.
    pub const PRE_AUTHENT: u32 = super::flag(10);
}

/// Explicit field `[n]` holding an INTEGER that must equal `expected`.
fn fixed_integer<'a>(
    n: u32,
    expected: i64,
    what: &'static str,
) -> impl FnMut(&'a [u8]) -> BerResult<'a, ()> {
    let mut field = decode::explicit(n, parse_der_i64);
    move |i: &'a [u8]| {
        let (i, value) = field(i)?;
        if value != expected {
            return Err(nom::Err::Error(BerError::invalid_value(
                Tag::Integer,
                format!("unexpected {what} {value}"),
            )));
        }
        Ok((i, ()))
    }
}

/// `PrincipalName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalName {
    /// Name type (NT-PRINCIPAL, NT-SRV-INST, ...).
    pub name_type: i32,
    /// Name components.
    pub components: Vec<String>,
}

impl PrincipalName {
    /// Creates a name.
    pub fn new(name_type: i32, components: Vec<String>) -> Self {
        Self {
            name_type,
            components,
        }
    }

    /// Components joined with `/`.
    pub fn joined(&self) -> String {
        self.components.join("/")
    }

    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        decode::sequence(|i| {
            let (i, name_type) = decode::explicit(0, parse_der_i32)(i)?;
            let (i, components) =
                decode::explicit(1, parse_der_sequence_of_v(decode::kerberos_string))(i)?;
            if components.is_empty() {
                return Err(nom::Err::Error(BerError::invalid_value(
                    Tag::Sequence,
                    "empty principal name".to_string(),
                )));
            }
            Ok((
                i,
                Self {
                    name_type,
                    components,
                },
            ))
        })(i)
    }

    fn encode(&self) -> Result<Vec<u8>, DerError> {
        let strings = self
            .components
            .iter()
            .map(|c| encode::kerberos_string(c))
            .collect::<Result<Vec<_>, _>>()?;
        encode::sequence(vec![
            encode::explicit(0, encode::integer(self.name_type.into())?)?,
            encode::explicit(1, encode::sequence(strings)?)?,
        ])
    }
}

/// `EncryptedData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// Encryption type of `cipher`.
    pub etype: i32,
    /// Key version, when the key is a long-term key.
    pub kvno: Option<u32>,
    /// Ciphertext.
    pub cipher: Vec<u8>,
}

impl EncryptedData {
    /// Encrypts `plaintext` with `key`.
    pub fn seal(
        key: &EncryptionKey,
        usage: u32,
        kvno: Option<u32>,
        plaintext: &[u8],
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            etype: key.etype().id(),
            kvno,
            cipher: key.encrypt(usage, plaintext)?,
        })
    }

    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        decode::sequence(|i| {
            let (i, etype) = decode::explicit(0, parse_der_i32)(i)?;
            let (i, kvno) = decode::optional_explicit(1, parse_der_u32)(i)?;
            let (i, cipher) = decode::explicit(2, decode::octet_string)(i)?;
            Ok((
                i,
                Self {
                    etype,
                    kvno,
                    cipher: cipher.to_vec(),
                },
            ))
        })(i)
    }

    fn encode(&self) -> Result<Vec<u8>, DerError> {
        let mut fields = vec![encode::explicit(0, encode::integer(self.etype.into())?)?];
        if let Some(kvno) = self.kvno {
            fields.push(encode::explicit(1, encode::integer(kvno.into())?)?);
        }
        fields.push(encode::explicit(2, encode::octet_string(&self.cipher)?)?);
        encode::sequence(fields)
    }
}

/// Key block (`EncryptionKey` in RFC 4120).
#[derive(Clone)]
pub struct KeyBlock {
    /// Encryption type.
    pub keytype: i32,
    value: Zeroizing<Vec<u8>>,
}

impl KeyBlock {
    /// Wraps a usable key.
    pub fn from_key(key: &EncryptionKey) -> Self {
        Self {
            keytype: key.etype().id(),
            value: Zeroizing::new(key.as_bytes().to_vec()),
        }
    }

    /// Converts into a usable key.
    pub fn to_key(&self) -> Result<EncryptionKey, CryptoError> {
        EncryptionKey::from_bytes(EncryptionType::from_id(self.keytype)?, &self.value)
    }

    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        decode::sequence(|i| {
            let (i, keytype) = decode::explicit(0, parse_der_i32)(i)?;
            let (i, value) = decode::explicit(1, decode::octet_string)(i)?;
            Ok((
                i,
                Self {
                    keytype,
                    value: Zeroizing::new(value.to_vec()),
                },
            ))
        })(i)
    }

    fn encode(&self) -> Result<Vec<u8>, DerError> {
        encode::sequence(vec![
            encode::explicit(0, encode::integer(self.keytype.into())?)?,
            encode::explicit(1, encode::octet_string(&self.value)?)?,
        ])
    }
}

impl std::fmt::Debug for KeyBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBlock")
            .field("keytype", &self.keytype)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// `Checksum`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    /// Checksum type (0x8003 for the GSS authenticator checksum).
    pub cksumtype: i32,
    /// Checksum bytes.
    pub checksum: Vec<u8>,
}

impl Checksum {
    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        decode::sequence(|i| {
            let (i, cksumtype) = decode::explicit(0, parse_der_i32)(i)?;
            let (i, checksum) = decode::explicit(1, decode::octet_string)(i)?;
            Ok((
                i,
                Self {
                    cksumtype,
                    checksum: checksum.to_vec(),
                },
            ))
        })(i)
    }

    fn encode(&self) -> Result<Vec<u8>, DerError> {
        encode::sequence(vec![
            encode::explicit(0, encode::integer(self.cksumtype.into())?)?,
            encode::explicit(1, encode::octet_string(&self.checksum)?)?,
        ])
    }
}

/// `Ticket`, with the encrypted part still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Realm of the service.
    pub realm: String,
    /// Service principal name.
    pub sname: PrincipalName,
    /// Encrypted `EncTicketPart`.
    pub enc_part: EncryptedData,
}

impl Ticket {
    fn parse(i: &[u8]) -> BerResult<'_, Self> {
        decode::application(
            1,
            decode::sequence(|i| {
                let (i, ()) = fixed_integer(0, PVNO, "tkt-vno")(i)?;
                let (i, realm) = decode::explicit(1, decode::kerberos_string)(i)?;
                let (i, sname) = decode::explicit(2, PrincipalName::parse)(i)?;
                let (i, enc_part) = decode::explicit(3, EncryptedData::parse)(i)?;
                Ok((
                    i,
                    Self {
                        realm,
                        sname,
                        enc_part,
                    },
                ))
            }),
        )(i)
    }

    fn encode(&self) -> Result<Vec<u8>, DerError> {
        encode::application(
            1,
            encode::sequence(vec![
                encode::explicit(0, encode::integer(PVNO)?)?,
                encode::explicit(1, encode::kerberos_string(&self.realm)?)?,
                encode::explicit(2, self.sname.encode()?)?,
                encode::explicit(3, self.enc_part.encode()?)?,
            ])?,
        )
    }
}

/// `KRB_AP_REQ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApReq {
    /// AP option flags.
    pub ap_options: u32,
    /// Service ticket.
    pub ticket: Ticket,
    /// Encrypted `Authenticator`.
    pub authenticator: EncryptedData,
}

impl ApReq {
    /// Decodes a complete AP-REQ message.
    pub fn decode(data: &[u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "AP-REQ",
            decode::application(
                14,
                decode::sequence(|i| {
                    let (i, ()) = fixed_integer(0, PVNO, "pvno")(i)?;
                    let (i, ()) = fixed_integer(1, MSG_TYPE_AP_REQ, "msg-type")(i)?;
                    let (i, ap_options) = decode::explicit(2, decode::kerberos_flags)(i)?;
                    let (i, ticket) = decode::explicit(3, Ticket::parse)(i)?;
                    let (i, authenticator) = decode::explicit(4, EncryptedData::parse)(i)?;
                    Ok((
                        i,
                        Self {
                            ap_options,
                            ticket,
                            authenticator,
                        },
                    ))
                }),
            ),
        )
    }

    /// Encodes the message.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        encode::application(
            14,
            encode::sequence(vec![
                encode::explicit(0, encode::integer(PVNO)?)?,
                encode::explicit(1, encode::integer(MSG_TYPE_AP_REQ)?)?,
                encode::explicit(2, encode::kerberos_flags(self.ap_options)?)?,
                encode::explicit(3, self.ticket.encode()?)?,
                encode::explicit(4, self.authenticator.encode()?)?,
            ])?,
        )
    }

    /// True when the client asked for mutual authentication.
    pub fn mutual_required(&self) -> bool {
        self.ap_options & ap_options::MUTUAL_REQUIRED != 0
    }
}

/// Decrypted `EncTicketPart`.
#[derive(Debug, Clone)]
pub struct EncTicketPart {
    /// Ticket flags.
    pub flags: u32,
    /// Session key shared with the client.
    pub key: KeyBlock,
    /// Client realm.
    pub crealm: String,
    /// Client principal.
    pub cname: PrincipalName,
    /// Time of initial authentication.
    pub authtime: DateTime<Utc>,
    /// Start of validity, defaults to `authtime`.
    pub starttime: Option<DateTime<Utc>>,
    /// End of validity.
    pub endtime: DateTime<Utc>,
    /// Renewal limit.
    pub renew_till: Option<DateTime<Utc>>,
}

impl EncTicketPart {
    /// Decodes the plaintext of a ticket `enc-part`.
    pub fn decode(data: &[u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "EncTicketPart",
            decode::application(
                3,
                decode::sequence(|i| {
                    let (i, flags) = decode::explicit(0, decode::kerberos_flags)(i)?;
                    let (i, key) = decode::explicit(1, KeyBlock::parse)(i)?;
                    let (i, crealm) = decode::explicit(2, decode::kerberos_string)(i)?;
                    let (i, cname) = decode::explicit(3, PrincipalName::parse)(i)?;
                    // transited encoding is not evaluated
                    let (i, ()) = decode::explicit(4, decode::skip)(i)?;
                    let (i, authtime) = decode::explicit(5, decode::kerberos_time)(i)?;
                    let (i, starttime) = decode::optional_explicit(6, decode::kerberos_time)(i)?;
                    let (i, endtime) = decode::explicit(7, decode::kerberos_time)(i)?;
                    let (i, renew_till) = decode::optional_explicit(8, decode::kerberos_time)(i)?;
                    Ok((
                        i,
                        Self {
                            flags,
                            key,
                            crealm,
                            cname,
                            authtime,
                            starttime,
                            endtime,
                            renew_till,
                        },
                    ))
                }),
            ),
        )
    }

    /// Encodes the plaintext form.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        let transited = encode::sequence(vec![
            encode::explicit(0, encode::integer(1)?)?,
            encode::explicit(1, encode::octet_string(&[])?)?,
        ])?;
        let mut fields = vec![
            encode::explicit(0, encode::kerberos_flags(self.flags)?)?,
            encode::explicit(1, self.key.encode()?)?,
            encode::explicit(2, encode::kerberos_string(&self.crealm)?)?,
            encode::explicit(3, self.cname.encode()?)?,
            encode::explicit(4, transited)?,
            encode::explicit(5, encode::kerberos_time(&self.authtime)?)?,
        ];
        if let Some(t) = &self.starttime {
            fields.push(encode::explicit(6, encode::kerberos_time(t)?)?);
        }
        fields.push(encode::explicit(7, encode::kerberos_time(&self.endtime)?)?);
        if let Some(t) = &self.renew_till {
            fields.push(encode::explicit(8, encode::kerberos_time(t)?)?);
        }
        encode::application(3, encode::sequence(fields)?)
    }
}

/// Decrypted `Authenticator`.
#[derive(Debug, Clone)]
pub struct Authenticator {
    /// Client realm.
    pub crealm: String,
    /// Client principal.
    pub cname: PrincipalName,
    /// Optional checksum.
    pub cksum: Option<Checksum>,
    /// Microsecond part of the client timestamp.
    pub cusec: u32,
    /// Client timestamp.
    pub ctime: DateTime<Utc>,
    /// Sub-session key proposed by the client.
    pub subkey: Option<KeyBlock>,
    /// Initial sequence number.
    pub seq_number: Option<u32>,
}

impl Authenticator {
    /// Decodes the plaintext of an AP-REQ authenticator.
    pub fn decode(data: &[u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "Authenticator",
            decode::application(
                2,
                decode::sequence(|i| {
                    let (i, ()) = fixed_integer(0, PVNO, "authenticator-vno")(i)?;
                    let (i, crealm) = decode::explicit(1, decode::kerberos_string)(i)?;
                    let (i, cname) = decode::explicit(2, PrincipalName::parse)(i)?;
                    let (i, cksum) = decode::optional_explicit(3, Checksum::parse)(i)?;
                    let (i, cusec) = decode::explicit(4, parse_der_u32)(i)?;
                    let (i, ctime) = decode::explicit(5, decode::kerberos_time)(i)?;
                    let (i, subkey) = decode::optional_explicit(6, KeyBlock::parse)(i)?;
                    let (i, seq_number) = decode::optional_explicit(7, parse_der_u32)(i)?;
                    Ok((
                        i,
                        Self {
                            crealm,
                            cname,
                            cksum,
                            cusec,
                            ctime,
                            subkey,
                            seq_number,
                        },
                    ))
                }),
            ),
        )
    }

    /// Encodes the plaintext form.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        let mut fields = vec![
            encode::explicit(0, encode::integer(PVNO)?)?,
            encode::explicit(1, encode::kerberos_string(&self.crealm)?)?,
            encode::explicit(2, self.cname.encode()?)?,
        ];
        if let Some(cksum) = &self.cksum {
            fields.push(encode::explicit(3, cksum.encode()?)?);
        }
        fields.push(encode::explicit(4, encode::integer(self.cusec.into())?)?);
        fields.push(encode::explicit(5, encode::kerberos_time(&self.ctime)?)?);
        if let Some(subkey) = &self.subkey {
            fields.push(encode::explicit(6, subkey.encode()?)?);
        }
        if let Some(n) = self.seq_number {
            fields.push(encode::explicit(7, encode::integer(n.into())?)?);
        }
        encode::application(2, encode::sequence(fields)?)
    }
}

/// `KRB_AP_REP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRep {
    /// Encrypted `EncAPRepPart`.
    pub enc_part: EncryptedData,
}

impl ApRep {
    /// Decodes a complete AP-REP message.
    pub fn decode(data: &[u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "AP-REP",
            decode::application(
                15,
                decode::sequence(|i| {
                    let (i, ()) = fixed_integer(0, PVNO, "pvno")(i)?;
                    let (i, ()) = fixed_integer(1, MSG_TYPE_AP_REP, "msg-type")(i)?;
                    let (i, enc_part) = decode::explicit(2, EncryptedData::parse)(i)?;
                    Ok((i, Self { enc_part }))
                }),
            ),
        )
    }

    /// Encodes the message.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        encode::application(
            15,
            encode::sequence(vec![
                encode::explicit(0, encode::integer(PVNO)?)?,
                encode::explicit(1, encode::integer(MSG_TYPE_AP_REP)?)?,
                encode::explicit(2, self.enc_part.encode()?)?,
            ])?,
        )
    }
}

/// Decrypted `EncAPRepPart`.
#[derive(Debug, Clone)]
pub struct EncApRepPart {
    /// Client timestamp echoed from the authenticator.
    pub ctime: DateTime<Utc>,
    /// Microseconds echoed from the authenticator.
    pub cusec: u32,
    /// Sub-session key chosen by the server.
    pub subkey: Option<KeyBlock>,
    /// Server initial sequence number.
    pub seq_number: Option<u32>,
}

impl EncApRepPart {
    /// Decodes the plaintext of an AP-REP `enc-part`.
    pub fn decode(data: &[u8]) -> Result<Self, DerError> {
        decode_all(
            data,
            "EncAPRepPart",
            decode::application(
                27,
                decode::sequence(|i| {
                    let (i, ctime) = decode::explicit(0, decode::kerberos_time)(i)?;
                    let (i, cusec) = decode::explicit(1, parse_der_u32)(i)?;
                    let (i, subkey) = decode::optional_explicit(2, KeyBlock::parse)(i)?;
                    let (i, seq_number) = decode::optional_explicit(3, parse_der_u32)(i)?;
                    Ok((
                        i,
                        Self {
                            ctime,
                            cusec,
                            subkey,
                            seq_number,
                        },
                    ))
                }),
            ),
        )
    }

    /// Encodes the plaintext form.
    pub fn encode(&self) -> Result<Vec<u8>, DerError> {
        let mut fields = vec![
            encode::explicit(0, encode::kerberos_time(&self.ctime)?)?,
            encode::explicit(1, encode::integer(self.cusec.into())?)?,
        ];
        if let Some(subkey) = &self.subkey {
            fields.push(encode::explicit(2, subkey.encode()?)?);
        }
        if let Some(n) = self.seq_number {
            fields.push(encode::explicit(3, encode::integer(n.into())?)?);
        }
        encode::application(27, encode::sequence(fields)?)
    }
}
