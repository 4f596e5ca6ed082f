//! Kerberos encryption types.
//!
//! Only the AES families are implemented: the RFC 3962 profile
//! (AES-CTS with HMAC-SHA1-96) and the RFC 8009 profile
//! (AES-CTS with HMAC-SHA256-128 / HMAC-SHA384-192).

use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;

/// Supported Kerberos encryption types (IANA etype numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EncryptionType {
    /// aes128-cts-hmac-sha1-96
    Aes128CtsHmacSha196,
    /// aes256-cts-hmac-sha1-96
    Aes256CtsHmacSha196,
    /// aes128-cts-hmac-sha256-128
    Aes128CtsHmacSha256128,
    /// aes256-cts-hmac-sha384-192
    Aes256CtsHmacSha384192,
}

/// Hash family used by the encryption profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HashFamily {
    Sha1,
    Sha256,
    Sha384,
}

impl EncryptionType {
    /// All implemented encryption types, strongest first.
    pub const ALL: [EncryptionType; 4] = [
        EncryptionType::Aes256CtsHmacSha384192,
        EncryptionType::Aes128CtsHmacSha256128,
        EncryptionType::Aes256CtsHmacSha196,
        EncryptionType::Aes128CtsHmacSha196,
    ];

    /// Looks up an encryption type by its wire number.
    pub fn from_id(id: i32) -> Result<Self, CryptoError> {
        match id {
            17 => Ok(Self::Aes128CtsHmacSha196),
            18 => Ok(Self::Aes256CtsHmacSha196),
            19 => Ok(Self::Aes128CtsHmacSha256128),
            20 => Ok(Self::Aes256CtsHmacSha384192),
            other => Err(CryptoError::UnsupportedEncryptionType(other)),
        }
    }

    /// Wire number of this encryption type.
    pub fn id(self) -> i32 {
        match self {
            Self::Aes128CtsHmacSha196 => 17,
            Self::Aes256CtsHmacSha196 => 18,
            Self::Aes128CtsHmacSha256128 => 19,
            Self::Aes256CtsHmacSha384192 => 20,
        }
    }

    /// Canonical name as used in krb5.conf and RFCs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes128CtsHmacSha196 => "aes128-cts-hmac-sha1-96",
            Self::Aes256CtsHmacSha196 => "aes256-cts-hmac-sha1-96",
            Self::Aes128CtsHmacSha256128 => "aes128-cts-hmac-sha256-128",
            Self::Aes256CtsHmacSha384192 => "aes256-cts-hmac-sha384-192",
        }
    }

    /// Size of the protocol key in bytes.
    pub fn key_size(self) -> usize {
        match self {
            Self::Aes128CtsHmacSha196 | Self::Aes128CtsHmacSha256128 => 16,
            Self::Aes256CtsHmacSha196 | Self::Aes256CtsHmacSha384192 => 32,
        }
    }

    /// Size of the truncated integrity tag appended to ciphertexts.
    pub fn mac_size(self) -> usize {
        match self {
            Self::Aes128CtsHmacSha196 | Self::Aes256CtsHmacSha196 => 12,
            Self::Aes128CtsHmacSha256128 => 16,
            Self::Aes256CtsHmacSha384192 => 24,
        }
    }

    pub(crate) fn hash_family(self) -> HashFamily {
        match self {
            Self::Aes128CtsHmacSha196 | Self::Aes256CtsHmacSha196 => HashFamily::Sha1,
            Self::Aes128CtsHmacSha256128 => HashFamily::Sha256,
            Self::Aes256CtsHmacSha384192 => HashFamily::Sha384,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<i32>() {
            return Self::from_id(id);
        }
        Self::ALL
            .into_iter()
            .find(|etype| etype.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CryptoError::InvalidInput(format!("unknown encryption type: {s}")))
    }
}
