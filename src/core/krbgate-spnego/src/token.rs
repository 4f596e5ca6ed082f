//! Transport encoding of negotiation tokens.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::ValidationError;

/// HTTP authentication scheme name.
pub const NEGOTIATE: &str = "Negotiate";

/// Extracts and base64-decodes the token from an `Authorization` value.
///
/// The scheme is matched case-insensitively. Returns `Ok(None)` when the
/// value is empty or carries the bare scheme without a token.
pub fn decode_authorization(value: &str) -> Result<Option<Vec<u8>>, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let (scheme, rest) = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest.trim()),
        None => (value, ""),
    };
    if !scheme.eq_ignore_ascii_case(NEGOTIATE) {
        return Err(ValidationError::Malformed(format!(
            "unsupported authorization scheme {scheme:?}"
        )));
    }
    if rest.is_empty() {
        return Ok(None);
    }

    BASE64
        .decode(rest)
        .map(Some)
        .map_err(|e| ValidationError::Malformed(format!("token is not base64: {e}")))
}

/// Formats a `WWW-Authenticate` value, with an optional token.
pub fn challenge_header(token: Option<&[u8]>) -> String {
    match token {
        Some(token) => format!("{NEGOTIATE} {}", BASE64.encode(token)),
        None => NEGOTIATE.to_string(),
    }
}
