//! Turns pool templates into jobs a chip can hash.
//!
//! A [`MiningTemplate`] plus the session's extranonces fixes the coinbase,
//! and with it the merkle root. Everything the chip needs beyond that is a
//! byte-order shuffle or, for chips that take them, midstates.

pub mod extranonce2;
pub mod merkle;
pub mod midstate;
#[cfg(test)]
pub mod test_blocks;
pub mod version;

use bitcoin::block::{Header, Version};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};

use crate::context::SessionParams;
use crate::stratum_v1::MiningTemplate;
pub use extranonce2::Extranonce2;
pub use version::increment_bitmask;

/// Midstates computed when the pool allows version rolling.
pub const ROLLED_MIDSTATES: usize = 4;

/// Work derived from one template and one extranonce2.
///
/// Immutable once built. The driver shares it behind an `Arc`, and a slot is
/// only ever replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct AsicJob {
    /// Pool job id, echoed back in `mining.submit`.
    pub template_job_id: String,
    pub extranonce2: Extranonce2,
    pub starting_nonce: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub version: u32,
    pub version_mask: u32,
    /// Share difficulty the pool asked for when the job was built.
    pub pool_difficulty: f64,
    pub merkle_root: TxMerkleNode,
    /// Merkle root with its 4-byte words in reverse order, as the chip reads it.
    pub merkle_root_be: [u8; 32],
    pub prev_block_hash: BlockHash,
    pub prev_block_hash_be: [u8; 32],
    pub midstates: Vec<[u8; 32]>,
    pub num_midstates: u8,
}

impl AsicJob {
    /// The header actually hashed for a nonce found at `rolled_version`.
    pub fn header(&self, rolled_version: u32, nonce: u32) -> Header {
        Header {
            version: Version::from_consensus(rolled_version as i32),
            prev_blockhash: self.prev_block_hash,
            merkle_root: self.merkle_root,
            time: self.ntime,
            bits: CompactTarget::from_consensus(self.nbits),
            nonce,
        }
    }
}

/// Reverses the order of the eight 4-byte words, leaving each word intact.
fn reverse_words(bytes: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (dst, src) in out.chunks_exact_mut(4).zip(bytes.chunks_exact(4).rev()) {
        dst.copy_from_slice(src);
    }
    out
}

/// Builds the job for `template` at extranonce2 counter `extranonce2`.
///
/// Version mask and pool difficulty come from `session` as they stand now;
/// later changes do not reach jobs already built.
pub fn build_job(template: &MiningTemplate, session: &SessionParams, extranonce2: u32) -> AsicJob {
    let extranonce2 = Extranonce2::new(extranonce2, session.extranonce2_len);
    let coinbase = merkle::coinbase(
        &template.coinbase1,
        &session.extranonce1,
        &extranonce2,
        &template.coinbase2,
    );
    let merkle_root = merkle::merkle_root(&coinbase, &template.merkle_branches);

    let prev = template.prev_block_hash.to_byte_array();
    let root = merkle_root.to_byte_array();

    let mut version = template.version;
    let mut midstates = vec![midstate::midstate(version, &prev, &root)];
    if session.version_mask != 0 {
        for _ in 1..ROLLED_MIDSTATES {
            version = increment_bitmask(version, session.version_mask);
            midstates.push(midstate::midstate(version, &prev, &root));
        }
    }

    AsicJob {
        template_job_id: template.job_id.clone(),
        extranonce2,
        starting_nonce: 0,
        nbits: template.nbits,
        ntime: template.ntime,
        version: template.version,
        version_mask: session.version_mask,
        pool_difficulty: session.pool_difficulty,
        merkle_root,
        merkle_root_be: reverse_words(&root),
        prev_block_hash: template.prev_block_hash,
        prev_block_hash_be: reverse_words(&prev),
        num_midstates: midstates.len() as u8,
        midstates,
    }
}
