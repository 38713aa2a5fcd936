//! Difficulty arithmetic.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Target};

/// Hash value of a difficulty-1 share, `0xffff * 2^208`.
pub const DIFF1: f64 = 2.695953529101131e67;

/// Difficulty a header hash achieves: `DIFF1 / hash`, reading the hash as a
/// little-endian 256-bit number.
pub fn share_difficulty(hash: &BlockHash) -> f64 {
    Target::from_le_bytes(hash.to_byte_array()).difficulty_float()
}

/// Network difficulty for a compact `nbits` target.
pub fn network_difficulty(nbits: u32) -> f64 {
    let mantissa = f64::from(nbits & 0x007f_ffff);
    let exponent = (nbits >> 24) as i32;
    let target = mantissa * 256f64.powi(exponent - 3);
    DIFF1 / target
}
