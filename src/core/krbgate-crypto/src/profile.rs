//! Kerberos encryption profiles.
//!
//! Implements the RFC 3961 simplified profile as instantiated by RFC 3962
//! (AES-CTS + HMAC-SHA1-96) and the RFC 8009 profile
//! (AES-CTS + HMAC-SHA256-128 / HMAC-SHA384-192).
//!
//! Ciphertext layout for both: `AES-CTS(Ke, confounder || plaintext) || H`,
//! where `H` is the truncated HMAC. The SHA-1 profile MACs the plaintext,
//! the SHA-2 profile MACs `IV || ciphertext`.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::aes_cts::{self, BlockCipher, BLOCK_SIZE};
use crate::error::CryptoError;
use crate::etype::{EncryptionType, HashFamily};
use crate::nfold::nfold;

/// Size of the random confounder prepended to every plaintext.
pub const CONFOUNDER_SIZE: usize = 16;

const ENCRYPTION_SUFFIX: u8 = 0xAA;
const INTEGRITY_SUFFIX: u8 = 0x55;

/// Encryption and integrity keys derived for one key usage number.
struct UsageKeys {
    ke: Zeroizing<Vec<u8>>,
    ki: Zeroizing<Vec<u8>>,
}

fn usage_constant(usage: u32, suffix: u8) -> [u8; 5] {
    let be = usage.to_be_bytes();
    [be[0], be[1], be[2], be[3], suffix]
}

/// Computes a (possibly multi-part) HMAC with the profile's hash.
pub(crate) fn hmac(family: HashFamily, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let invalid = |_: hmac::digest::InvalidLength| CryptoError::InvalidKey("bad HMAC key".to_string());
    let digest = match family {
        HashFamily::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid)?;
            parts.iter().for_each(|p| mac.update(p));
            mac.finalize().into_bytes().to_vec()
        },
        HashFamily::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?;
            parts.iter().for_each(|p| mac.update(p));
            mac.finalize().into_bytes().to_vec()
        },
        HashFamily::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key).map_err(invalid)?;
            parts.iter().for_each(|p| mac.update(p));
            mac.finalize().into_bytes().to_vec()
        },
    };
    Ok(digest)
}

/// `DK(base, constant)` from RFC 3961 section 5.1.
///
/// For AES `random-to-key` is the identity, so `DK == DR`.
pub(crate) fn derive_key_dk(base: &[u8], constant: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = BlockCipher::new(base)?;

    let folded = nfold(constant, BLOCK_SIZE);
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&folded);

    let mut out = Zeroizing::new(Vec::with_capacity(base.len()));
    while out.len() < base.len() {
        cipher.encrypt_block(&mut block);
        let take = (base.len() - out.len()).min(BLOCK_SIZE);
        out.extend_from_slice(&block[..take]);
    }
    Ok(out)
}

/// `KDF-HMAC-SHA2(key, label, k)` from RFC 8009 section 3.
pub(crate) fn derive_key_sha2(
    family: HashFamily,
    key: &[u8],
    label: &[u8],
    bits: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let digest = hmac(
        family,
        key,
        &[&1u32.to_be_bytes()[..], label, &[0u8][..], &bits.to_be_bytes()[..]],
    )?;
    let len = (bits / 8) as usize;
    if len > digest.len() {
        return Err(CryptoError::KeyDerivationFailed(format!(
            "requested {bits} bits from a {} byte digest",
            digest.len()
        )));
    }
    Ok(Zeroizing::new(digest[..len].to_vec()))
}

fn derive_usage_keys(etype: EncryptionType, base: &[u8], usage: u32) -> Result<UsageKeys, CryptoError> {
    if base.len() != etype.key_size() {
        return Err(CryptoError::InvalidKey(format!(
            "{etype} expects {} bytes, got {}",
            etype.key_size(),
            base.len()
        )));
    }

    let ke_label = usage_constant(usage, ENCRYPTION_SUFFIX);
    let ki_label = usage_constant(usage, INTEGRITY_SUFFIX);

    let keys = match etype.hash_family() {
        HashFamily::Sha1 => UsageKeys {
            ke: derive_key_dk(base, &ke_label)?,
            ki: derive_key_dk(base, &ki_label)?,
        },
        family @ HashFamily::Sha256 => UsageKeys {
            ke: derive_key_sha2(family, base, &ke_label, 128)?,
            ki: derive_key_sha2(family, base, &ki_label, 128)?,
        },
        family @ HashFamily::Sha384 => UsageKeys {
            ke: derive_key_sha2(family, base, &ke_label, 256)?,
            ki: derive_key_sha2(family, base, &ki_label, 192)?,
        },
    };
    Ok(keys)
}

/// Encrypts `plaintext` for `usage` under the protocol key `base`.
pub(crate) fn encrypt(
    etype: EncryptionType,
    base: &[u8],
    usage: u32,
    confounder: &[u8; CONFOUNDER_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let keys = derive_usage_keys(etype, base, usage)?;

    let mut data = Zeroizing::new(Vec::with_capacity(CONFOUNDER_SIZE + plaintext.len()));
    data.extend_from_slice(confounder);
    data.extend_from_slice(plaintext);

    let mut out = aes_cts::encrypt(&keys.ke, &data)?;
    let family = etype.hash_family();
    let mac = match family {
        HashFamily::Sha1 => hmac(family, &keys.ki, &[data.as_slice()])?,
        HashFamily::Sha256 | HashFamily::Sha384 => {
            hmac(family, &keys.ki, &[&[0u8; BLOCK_SIZE][..], out.as_slice()])?
        },
    };
    out.extend_from_slice(&mac[..etype.mac_size()]);
    Ok(out)
}

/// Verifies and decrypts `ciphertext` for `usage` under `base`.
///
/// Returns the plaintext with the confounder stripped. Every failure maps
/// to [`CryptoError::DecryptionFailed`].
pub(crate) fn decrypt(
    etype: EncryptionType,
    base: &[u8],
    usage: u32,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mac_size = etype.mac_size();
    if ciphertext.len() < CONFOUNDER_SIZE + mac_size {
        return Err(CryptoError::DecryptionFailed);
    }

    let keys = derive_usage_keys(etype, base, usage)?;
    let (body, tag) = ciphertext.split_at(ciphertext.len() - mac_size);
    let family = etype.hash_family();

    let plaintext = match family {
        HashFamily::Sha1 => {
            let plaintext = Zeroizing::new(
                aes_cts::decrypt(&keys.ke, body).map_err(|_| CryptoError::DecryptionFailed)?,
            );
            let expected = hmac(family, &keys.ki, &[plaintext.as_slice()])?;
            verify_tag(&expected[..mac_size], tag)?;
            plaintext
        },
        HashFamily::Sha256 | HashFamily::Sha384 => {
            let expected = hmac(family, &keys.ki, &[&[0u8; BLOCK_SIZE][..], body])?;
            verify_tag(&expected[..mac_size], tag)?;
            Zeroizing::new(aes_cts::decrypt(&keys.ke, body).map_err(|_| CryptoError::DecryptionFailed)?)
        },
    };

    Ok(Zeroizing::new(plaintext[CONFOUNDER_SIZE..].to_vec()))
}

fn verify_tag(expected: &[u8], actual: &[u8]) -> Result<(), CryptoError> {
    if bool::from(expected.ct_eq(actual)) {
        Ok(())
    } else {
        Err(CryptoError::DecryptionFailed)
    }
}
