//! SHA-256 midstates for the first header block.
//!
//! The first 64 bytes of a header (version, previous hash, and 28 bytes of
//! merkle root) are fixed for a job. Chips that take midstates hash them
//! once per version and resume from there for every nonce.

use sha2::compress256;
use sha2::digest::generic_array::{GenericArray, typenum::U64};

const SHA256_IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Midstate of `version || prev_hash || merkle_root[..28]`.
///
/// Both hashes are in internal byte order. The result is the compression
/// state serialized big-endian and then byte-reversed, the layout the chip
/// expects.
pub fn midstate(version: u32, prev_hash: &[u8; 32], merkle_root: &[u8; 32]) -> [u8; 32] {
    let mut block = GenericArray::<u8, U64>::default();
    block[0..4].copy_from_slice(&version.to_le_bytes());
    block[4..36].copy_from_slice(prev_hash);
    block[36..64].copy_from_slice(&merkle_root[..28]);

    let mut state = SHA256_IV;
    compress256(&mut state, std::slice::from_ref(&block));

    let mut out = [0u8; 32];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out.reverse();
    out
}
