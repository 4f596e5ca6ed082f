//! Caller supplied TTL parsing and the bounds applied to it.
//!
//! Durations use compound unit notation (`1h30m`, `100ms`, `-30s`): one or
//! more decimal quantities, each followed by one of `ns`, `us`, `µs`, `ms`,
//! `s`, `m`, `h`. An empty string means "not requested".

use chrono::Duration;
use tracing::warn;

use crate::error::TtlError;

/// TTL granted when neither the request nor the configuration sets one.
pub const SYSTEM_DEFAULT_TTL_SECS: i64 = 768 * 3600;

/// Upper bound applied when the configuration sets none.
pub const SYSTEM_MAX_TTL_SECS: i64 = 768 * 3600;

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;

const LIMIT: u64 = 1 << 63;

fn unit_nanos(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(NANOSECOND),
        // U+00B5 micro sign and U+03BC greek small letter mu
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(MICROSECOND),
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        _ => None,
    }
}

/// Parses a TTL string.
///
/// Returns a zero duration for the empty string; the caller decides what
/// zero means. Negative values parse successfully.
pub fn parse_ttl(input: &str) -> Result<Duration, TtlError> {
    if input.is_empty() {
        return Ok(Duration::zero());
    }

    let invalid = || TtlError::Invalid(input.to_string());
    let overflow = || TtlError::Overflow(input.to_string());

    let mut s = input;
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::zero());
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    while !s.is_empty() {
        let first = s.as_bytes()[0];
        if !(first == b'.' || first.is_ascii_digit()) {
            return Err(invalid());
        }

        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        let mut value: u64 = 0;
        for b in s[..digits].bytes() {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(b - b'0')))
                .filter(|v| *v <= LIMIT)
                .ok_or_else(overflow)?;
        }
        let has_integer = digits > 0;
        s = &s[digits..];

        let mut fraction: u64 = 0;
        let mut scale: f64 = 1.0;
        let mut has_fraction = false;
        if let Some(rest) = s.strip_prefix('.') {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            let mut saturated = false;
            for b in rest[..digits].bytes() {
                if saturated {
                    continue;
                }
                match fraction
                    .checked_mul(10)
                    .and_then(|f| f.checked_add(u64::from(b - b'0')))
                    .filter(|f| *f <= LIMIT)
                {
                    Some(f) => {
                        fraction = f;
                        scale *= 10.0;
                    },
                    None => saturated = true,
                }
            }
            has_fraction = digits > 0;
            s = &rest[digits..];
        }
        if !has_integer && !has_fraction {
            return Err(invalid());
        }

        let unit_len = s
            .bytes()
            .take_while(|b| !(*b == b'.' || b.is_ascii_digit()))
            .count();
        if unit_len == 0 {
            return Err(TtlError::MissingUnit(input.to_string()));
        }
        let unit_text = &s[..unit_len];
        s = &s[unit_len..];
        let unit = unit_nanos(unit_text).ok_or_else(|| TtlError::UnknownUnit {
            unit: unit_text.to_string(),
            input: input.to_string(),
        })?;

        if value > LIMIT / unit {
            return Err(overflow());
        }
        value *= unit;
        if fraction > 0 {
            value += (fraction as f64 * (unit as f64 / scale)) as u64;
            if value > LIMIT {
                return Err(overflow());
            }
        }

        total = total
            .checked_add(value)
            .filter(|t| *t <= LIMIT)
            .ok_or_else(overflow)?;
    }

    if negative {
        // -(1 << 63) is representable
        return Ok(Duration::nanoseconds((total as i64).wrapping_neg()));
    }
    if total > LIMIT - 1 {
        return Err(overflow());
    }
    Ok(Duration::nanoseconds(total as i64))
}

/// Bounds applied to a requested TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    default_ttl: Duration,
    max_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::zero(), Duration::zero())
    }
}

impl TtlPolicy {
    /// Builds a policy from configured values, where zero means "system value".
    ///
    /// A default above the maximum is lowered to the maximum.
    pub fn new(token_ttl: Duration, token_max_ttl: Duration) -> Self {
        let max_ttl = if token_max_ttl > Duration::zero() {
            token_max_ttl
        } else {
            Duration::seconds(SYSTEM_MAX_TTL_SECS)
        };
        let default_ttl = if token_ttl > Duration::zero() {
            token_ttl
        } else {
            Duration::seconds(SYSTEM_DEFAULT_TTL_SECS)
        };
        Self {
            default_ttl: default_ttl.min(max_ttl),
            max_ttl,
        }
    }

    /// TTL used when none is requested.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Upper bound.
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Resolves a parsed request into the effective TTL.
    ///
    /// Zero selects the default, values above the maximum are clamped and
    /// negative values are rejected.
    pub fn resolve(&self, requested: Duration) -> Result<Duration, TtlError> {
        if requested < Duration::zero() {
            return Err(TtlError::Negative);
        }
        if requested.is_zero() {
            return Ok(self.default_ttl);
        }
        if requested > self.max_ttl {
            warn!(
                requested_secs = requested.num_seconds(),
                max_secs = self.max_ttl.num_seconds(),
                "requested ttl exceeds maximum, clamping"
            );
            return Ok(self.max_ttl);
        }
        Ok(requested)
    }

    /// Parses and resolves a raw TTL string.
    pub fn resolve_str(&self, requested: &str) -> Result<Duration, TtlError> {
        self.resolve(parse_ttl(requested)?)
    }
}
