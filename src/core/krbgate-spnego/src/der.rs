//! DER building blocks for the Kerberos and SPNEGO structures.
//!
//! [`decode`] wraps `der-parser` combinators and [`encode`] wraps the
//! `asn1-rs` serializers. Kerberos puts every field behind an explicit
//! context tag and most messages behind an `[APPLICATION n]` tag; these
//! helpers keep the message modules close to the ASN.1 they implement.

use asn1_rs::{Class, Tag};
use der_parser::der::der_read_element_header;
use der_parser::error::BerResult;

use crate::error::DerError;

const KERBEROS_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// Class and tag number of the first element in `data`, without reading
/// its content.
pub fn peek(data: &[u8]) -> Option<(Class, Tag)> {
    der_read_element_header(data)
        .ok()
        .map(|(_, hdr)| (hdr.class(), hdr.tag()))
}

/// Runs `parser` over `data` and requires every byte to be consumed.
pub fn decode_all<'a, T>(
    data: &'a [u8],
    what: &str,
    mut parser: impl FnMut(&'a [u8]) -> BerResult<'a, T>,
) -> Result<T, DerError> {
    match parser(data) {
        Ok((rest, value)) if rest.is_empty() => Ok(value),
        Ok(_) => Err(DerError::new(format!("trailing data after {what}"))),
        Err(e) => Err(DerError::new(format!("{what}: {e}"))),
    }
}

/// Decoding combinators over `der-parser`.
pub mod decode {
    use asn1_rs::{Class, Enumerated, FromDer, Header, Tag};
    use chrono::{DateTime, NaiveDateTime, Utc};
    use der_parser::der::{
        der_read_element_header, parse_der_container, parse_der_sequence_defined_g, parse_der_slice,
    };
    use der_parser::error::{BerError, BerResult};
    use der_parser::nom;

    use super::KERBEROS_TIME_FORMAT;

    fn whole<'a, T>((rest, value): (&'a [u8], T)) -> BerResult<'a, T> {
        if rest.is_empty() {
            Ok((rest, value))
        } else {
            Err(nom::Err::Error(BerError::InvalidLength))
        }
    }

    /// Explicit context tag `[n]` around exactly one value.
    pub fn explicit<'a, T, F>(n: u32, mut f: F) -> impl FnMut(&'a [u8]) -> BerResult<'a, T>
    where
        F: FnMut(&'a [u8]) -> BerResult<'a, T>,
    {
        parse_der_container(move |content: &'a [u8], hdr: Header<'a>| {
            hdr.assert_class(Class::ContextSpecific)?;
            hdr.assert_tag(Tag(n))?;
            hdr.assert_constructed()?;
            whole(f(content)?)
        })
    }

    /// Optional explicit context tag `[n]`.
    ///
    /// Absent when the next element carries another tag. A present field
    /// that fails to decode is an error.
    pub fn optional_explicit<'a, T, F>(
        n: u32,
        f: F,
    ) -> impl FnMut(&'a [u8]) -> BerResult<'a, Option<T>>
    where
        F: FnMut(&'a [u8]) -> BerResult<'a, T>,
    {
        let mut field = explicit(n, f);
        move |i: &'a [u8]| match der_read_element_header(i) {
            Ok((_, hdr)) if hdr.is_contextspecific() && hdr.tag() == Tag(n) => {
                let (rest, value) = field(i)?;
                Ok((rest, Some(value)))
            },
            _ => Ok((i, None)),
        }
    }

    /// `[APPLICATION n]` wrapper around exactly one value.
    pub fn application<'a, T, F>(n: u32, mut f: F) -> impl FnMut(&'a [u8]) -> BerResult<'a, T>
    where
        F: FnMut(&'a [u8]) -> BerResult<'a, T>,
    {
        parse_der_container(move |content: &'a [u8], hdr: Header<'a>| {
            hdr.assert_class(Class::Application)?;
            hdr.assert_tag(Tag(n))?;
            hdr.assert_constructed()?;
            whole(f(content)?)
        })
    }

    /// SEQUENCE whose members are read by `f`.
    ///
    /// Members after the ones `f` reads are skipped, which leaves room for
    /// extension fields such as `caddr` and `authorization-data`.
    pub fn sequence<'a, T, F>(mut f: F) -> impl FnMut(&'a [u8]) -> BerResult<'a, T>
    where
        F: FnMut(&'a [u8]) -> BerResult<'a, T>,
    {
        parse_der_sequence_defined_g(move |content: &'a [u8], _| f(content))
    }

    /// Any single element, discarded.
    pub fn skip(i: &[u8]) -> BerResult<()> {
        parse_der_container(|_, _| Ok((&b""[..], ())))(i)
    }

    /// OCTET STRING content.
    pub fn octet_string(i: &[u8]) -> BerResult<&[u8]> {
        parse_der_slice(i, Tag::OctetString)
    }

    /// OBJECT IDENTIFIER content bytes.
    pub fn oid(i: &[u8]) -> BerResult<&[u8]> {
        parse_der_slice(i, Tag::Oid)
    }

    /// ENUMERATED value.
    pub fn enumerated(i: &[u8]) -> BerResult<u32> {
        Enumerated::from_der(i).map(|(rest, value)| (rest, value.0))
    }

    /// KerberosString: GeneralString, or UTF8String from lenient encoders.
    pub fn kerberos_string(i: &[u8]) -> BerResult<String> {
        parse_der_container(|content: &[u8], hdr: Header| {
            hdr.assert_class(Class::Universal)?;
            hdr.assert_primitive()?;
            if hdr.tag() != Tag::GeneralString && hdr.tag() != Tag::Utf8String {
                return Err(nom::Err::Error(BerError::unexpected_tag(
                    Some(Tag::GeneralString),
                    hdr.tag(),
                )));
            }
            let value = std::str::from_utf8(content).map_err(BerError::from)?;
            Ok((&b""[..], value.to_string()))
        })(i)
    }

    /// KerberosFlags as a `u32` where flag `n` is bit `31 - n`.
    ///
    /// Encoders may send more than 32 bits; the extra bits are ignored.
    pub fn kerberos_flags(i: &[u8]) -> BerResult<u32> {
        let (rest, content) = parse_der_slice(i, Tag::BitString)?;
        match content.split_first() {
            Some((&unused, bits)) if unused < 8 => {
                let mut buf = [0u8; 4];
                let n = bits.len().min(4);
                buf[..n].copy_from_slice(&bits[..n]);
                Ok((rest, u32::from_be_bytes(buf)))
            },
            _ => Err(nom::Err::Error(BerError::BerValueError)),
        }
    }

    /// KerberosTime (`YYYYMMDDHHMMSSZ`).
    pub fn kerberos_time(i: &[u8]) -> BerResult<DateTime<Utc>> {
        let (rest, content) = parse_der_slice(i, Tag::GeneralizedTime)?;
        std::str::from_utf8(content)
            .ok()
            .and_then(|text| NaiveDateTime::parse_from_str(text, KERBEROS_TIME_FORMAT).ok())
            .map(|time| (rest, time.and_utc()))
            .ok_or(nom::Err::Error(BerError::InvalidDateTime))
    }
}

/// Serializers over `asn1-rs`.
pub mod encode {
    use std::borrow::Cow;

    use asn1_rs::{
        Any, BitString, Class, Enumerated, GeneralString, Header, Length, OctetString, Oid, Sequence,
        Tag, ToDer,
    };
    use chrono::{DateTime, Utc};

    use super::KERBEROS_TIME_FORMAT;
    use crate::error::DerError;

    fn serialize<T: ToDer>(value: &T) -> Result<Vec<u8>, DerError> {
        value
            .to_der_vec()
            .map_err(|e| DerError::new(format!("encoding failed: {e}")))
    }

    fn constructed(class: Class, n: u32, content: &[u8]) -> Result<Vec<u8>, DerError> {
        let header = Header::new(class, true, Tag(n), Length::Definite(content.len()));
        serialize(&Any::new(header, content))
    }

    /// Wraps an encoded element in an explicit context tag `[n]`.
    pub fn explicit(n: u32, inner: Vec<u8>) -> Result<Vec<u8>, DerError> {
        constructed(Class::ContextSpecific, n, &inner)
    }

    /// Wraps encoded content in `[APPLICATION n]`.
    pub fn application(n: u32, inner: Vec<u8>) -> Result<Vec<u8>, DerError> {
        constructed(Class::Application, n, &inner)
    }

    /// SEQUENCE of already encoded members.
    pub fn sequence(members: Vec<Vec<u8>>) -> Result<Vec<u8>, DerError> {
        serialize(&Sequence::new(Cow::Owned(members.concat())))
    }

    /// INTEGER.
    pub fn integer(value: i64) -> Result<Vec<u8>, DerError> {
        serialize(&value)
    }

    /// ENUMERATED.
    pub fn enumerated(value: u32) -> Result<Vec<u8>, DerError> {
        serialize(&Enumerated::new(value))
    }

    /// OCTET STRING.
    pub fn octet_string(value: &[u8]) -> Result<Vec<u8>, DerError> {
        serialize(&OctetString::new(value))
    }

    /// OBJECT IDENTIFIER from its content bytes.
    pub fn oid(content: &[u8]) -> Result<Vec<u8>, DerError> {
        serialize(&Oid::new(Cow::Borrowed(content)))
    }

    /// KerberosString as GeneralString.
    pub fn kerberos_string(value: &str) -> Result<Vec<u8>, DerError> {
        serialize(&GeneralString::new(value))
    }

    /// 32 KerberosFlags as a BIT STRING.
    pub fn kerberos_flags(flags: u32) -> Result<Vec<u8>, DerError> {
        let bits = flags.to_be_bytes();
        serialize(&BitString::new(0, &bits))
    }

    /// KerberosTime.
    pub fn kerberos_time(time: &DateTime<Utc>) -> Result<Vec<u8>, DerError> {
        let text = time.format(KERBEROS_TIME_FORMAT).to_string();
        serialize(&Any::from_tag_and_data(Tag::GeneralizedTime, text.as_bytes()))
    }
}
