//! The n-fold operation from RFC 3961 section 5.1.
//!
//! Stretches or compresses an input to a fixed length by replicating it
//! with 13-bit rotations and summing the copies with one's-complement
//! addition.

/// Folds `input` into `out_len` bytes.
///
/// `input` must not be empty.
pub fn nfold(input: &[u8], out_len: usize) -> Vec<u8> {
    let in_len = input.len();
    let mut out = vec![0u8; out_len];
    if in_len == 0 || out_len == 0 {
        return out;
    }

    let lcm = lcm(in_len, out_len);
    let in_bits = in_len << 3;
    let mut byte: u32 = 0;

    for i in (0..lcm).rev() {
        let msbit = ((in_bits - 1) + ((in_bits + 13) * (i / in_len)) + ((in_len - (i % in_len)) << 3))
            % in_bits;

        let hi = u32::from(input[((in_len - 1) - (msbit >> 3)) % in_len]);
        let lo = u32::from(input[(in_len - (msbit >> 3)) % in_len]);
        byte += (((hi << 8) | lo) >> ((msbit & 7) + 1)) & 0xff;
        byte += u32::from(out[i % out_len]);
        out[i % out_len] = (byte & 0xff) as u8;
        byte >>= 8;
    }

    // end-around carry
    if byte != 0 {
        for slot in out.iter_mut().rev() {
            byte += u32::from(*slot);
            *slot = (byte & 0xff) as u8;
            byte >>= 8;
        }
    }

    out
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}
