//! Password based key derivation (string-to-key).
//!
//! - RFC 3962: `DK(PBKDF2-HMAC-SHA1(password, salt, iter), "kerberos")`,
//!   4096 iterations by default.
//! - RFC 8009: `KDF-HMAC-SHA2(PBKDF2-HMAC-SHA2(password, name|0|salt, iter), "kerberos")`,
//!   32768 iterations by default.

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::etype::{EncryptionType, HashFamily};
use crate::profile::{derive_key_dk, derive_key_sha2};

/// Default PBKDF2 iteration count for the SHA-1 profile.
pub const SHA1_DEFAULT_ITERATIONS: u32 = 4096;

/// Default PBKDF2 iteration count for the SHA-2 profile.
pub const SHA2_DEFAULT_ITERATIONS: u32 = 32768;

const KERBEROS_CONSTANT: &[u8] = b"kerberos";

/// Default salt for a principal: realm followed by all name components.
pub fn default_salt(realm: &str, components: &[String]) -> String {
    let mut salt = String::from(realm);
    for component in components {
        salt.push_str(component);
    }
    salt
}

/// Derives a protocol key from a password using the default iteration count.
pub fn string_to_key(
    etype: EncryptionType,
    password: &str,
    salt: &str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let iterations = match etype.hash_family() {
        HashFamily::Sha1 => SHA1_DEFAULT_ITERATIONS,
        HashFamily::Sha256 | HashFamily::Sha384 => SHA2_DEFAULT_ITERATIONS,
    };
    string_to_key_with_iterations(etype, password, salt, iterations)
}

/// Derives a protocol key from a password with an explicit iteration count.
pub fn string_to_key_with_iterations(
    etype: EncryptionType,
    password: &str,
    salt: &str,
    iterations: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::InvalidInput(
            "iteration count must be > 0".to_string(),
        ));
    }

    let key_size = etype.key_size();
    let mut tkey = Zeroizing::new(vec![0u8; key_size]);

    match etype.hash_family() {
        HashFamily::Sha1 => {
            pbkdf2_hmac::<Sha1>(password.as_bytes(), salt.as_bytes(), iterations, &mut tkey);
            derive_key_dk(&tkey, KERBEROS_CONSTANT)
        },
        family => {
            let mut saltp = Vec::with_capacity(etype.name().len() + 1 + salt.len());
            saltp.extend_from_slice(etype.name().as_bytes());
            saltp.push(0);
            saltp.extend_from_slice(salt.as_bytes());

            if family == HashFamily::Sha256 {
                pbkdf2_hmac::<Sha256>(password.as_bytes(), &saltp, iterations, &mut tkey);
            } else {
                pbkdf2_hmac::<Sha384>(password.as_bytes(), &saltp, iterations, &mut tkey);
            }
            derive_key_sha2(family, &tkey, KERBEROS_CONSTANT, (key_size * 8) as u32)
        },
    }
}
