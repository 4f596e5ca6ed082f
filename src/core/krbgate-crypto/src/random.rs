//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG for all random number generation.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::profile::CONFOUNDER_SIZE;

/// Generates random key material of the given length.
///
/// The bytes are wrapped in `Zeroizing` to ensure they are cleared from memory when dropped.
pub fn generate_key_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Generates a fresh confounder for one encryption.
pub fn generate_confounder() -> [u8; CONFOUNDER_SIZE] {
    let mut confounder = [0u8; CONFOUNDER_SIZE];
    OsRng.fill_bytes(&mut confounder);
    confounder
}

/// Generates a random 32-bit number (sequence numbers, nonces).
pub fn generate_u32() -> u32 {
    OsRng.next_u32()
}
