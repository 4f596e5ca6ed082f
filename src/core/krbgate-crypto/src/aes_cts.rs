//! AES in CBC mode with ciphertext stealing.
//!
//! Kerberos uses the CS3 variant with a zero IV (RFC 3962 section 5): the
//! last two ciphertext blocks are always swapped. A single block input is
//! plain AES. Inputs must be at least one block.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};
use cts::{CbcCs3Dec, CbcCs3Enc, Decrypt, Encrypt};

use crate::error::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

type Block = [u8; BLOCK_SIZE];

/// AES block cipher keyed with a 128 or 256 bit key.
pub(crate) enum BlockCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl BlockCipher {
    pub(crate) fn new(key: &[u8]) -> Result<Self, CryptoError> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(Self::Aes128)
                .map_err(|_| CryptoError::InvalidKey("bad AES-128 key".to_string())),
            32 => Aes256::new_from_slice(key)
                .map(Self::Aes256)
                .map_err(|_| CryptoError::InvalidKey("bad AES-256 key".to_string())),
            n => Err(invalid_key_length(n)),
        }
    }

    pub(crate) fn encrypt_block(&self, block: &mut Block) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self {
            Self::Aes128(cipher) => cipher.decrypt_block(block),
            Self::Aes256(cipher) => cipher.decrypt_block(block),
        }
    }
}

fn invalid_key_length(n: usize) -> CryptoError {
    CryptoError::InvalidKey(format!("expected 16 or 32 bytes, got {n}"))
}

fn bad_key<E>(_: E) -> CryptoError {
    CryptoError::InvalidKey("bad AES key".to_string())
}

fn short_input<E>(_: E) -> CryptoError {
    CryptoError::InvalidInput("input shorter than one block".to_string())
}

enum Direction {
    Encrypt,
    Decrypt,
}

fn apply(key: &[u8], data: &[u8], direction: Direction) -> Result<Vec<u8>, CryptoError> {
    if data.len() < BLOCK_SIZE {
        return Err(short_input(()));
    }
    if data.len() == BLOCK_SIZE {
        let cipher = BlockCipher::new(key)?;
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(data);
        match direction {
            Direction::Encrypt => cipher.encrypt_block(&mut block),
            Direction::Decrypt => cipher.decrypt_block(&mut block),
        }
        return Ok(block.to_vec());
    }

    let mut buf = data.to_vec();
    let result = match (key.len(), direction) {
        (16, Direction::Encrypt) => CbcCs3Enc::<Aes128>::new_from_slices(key, &ZERO_IV)
            .map_err(bad_key)?
            .encrypt(&mut buf),
        (16, Direction::Decrypt) => CbcCs3Dec::<Aes128>::new_from_slices(key, &ZERO_IV)
            .map_err(bad_key)?
            .decrypt(&mut buf),
        (32, Direction::Encrypt) => CbcCs3Enc::<Aes256>::new_from_slices(key, &ZERO_IV)
            .map_err(bad_key)?
            .encrypt(&mut buf),
        (32, Direction::Decrypt) => CbcCs3Dec::<Aes256>::new_from_slices(key, &ZERO_IV)
            .map_err(bad_key)?
            .decrypt(&mut buf),
        (n, _) => return Err(invalid_key_length(n)),
    };
    result.map_err(short_input)?;
    Ok(buf)
}

/// Encrypts `plaintext` with AES-CBC-CS3 and a zero IV.
pub(crate) fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    apply(key, plaintext, Direction::Encrypt)
}

/// Decrypts a ciphertext produced by [`encrypt`].
pub(crate) fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    apply(key, ciphertext, Direction::Decrypt)
}
