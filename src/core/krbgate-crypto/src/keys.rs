//! Kerberos key type with automatic memory zeroization.
//!
//! `EncryptionKey` implements `Zeroize` and `ZeroizeOnDrop` so long-term
//! service keys and ticket session keys are erased when no longer needed.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::etype::EncryptionType;
use crate::profile;
use crate::random::{generate_confounder, generate_key_bytes};
use crate::string_to_key::string_to_key;

/// A Kerberos protocol key bound to its encryption type.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    #[zeroize(skip)]
    etype: EncryptionType,
    bytes: Vec<u8>,
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length does not match the encryption type.
    pub fn from_bytes(etype: EncryptionType, bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != etype.key_size() {
            return Err(CryptoError::InvalidKey(format!(
                "{etype} expects {} bytes, got {}",
                etype.key_size(),
                bytes.len()
            )));
        }
        Ok(Self {
            etype,
            bytes: bytes.to_vec(),
        })
    }

    /// Generates a new random key (ticket session keys).
    pub fn generate(etype: EncryptionType) -> Self {
        let bytes = generate_key_bytes(etype.key_size());
        Self {
            etype,
            bytes: bytes.to_vec(),
        }
    }

    /// Derives a key from a password and salt.
    pub fn from_password(
        etype: EncryptionType,
        password: &str,
        salt: &str,
    ) -> Result<Self, CryptoError> {
        let bytes = string_to_key(etype, password, salt)?;
        Self::from_bytes(etype, &bytes)
    }

    /// Returns the encryption type.
    #[inline]
    pub fn etype(&self) -> EncryptionType {
        self.etype
    }

    /// Returns the raw key bytes.
    ///
    /// Use with caution - the returned slice is not zeroized automatically.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encrypts `plaintext` for the given key usage number.
    pub fn encrypt(&self, usage: u32, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        profile::encrypt(
            self.etype,
            &self.bytes,
            usage,
            &generate_confounder(),
            plaintext,
        )
    }

    /// Verifies and decrypts `ciphertext` for the given key usage number.
    pub fn decrypt(&self, usage: u32, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        profile::decrypt(self.etype, &self.bytes, usage, ciphertext)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("etype", &self.etype)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
