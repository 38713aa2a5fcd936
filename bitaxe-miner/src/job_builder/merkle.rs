//! Coinbase assembly and merkle root computation.

use bitcoin::TxMerkleNode;
use bitcoin::hashes::{Hash, sha256d};

use super::extranonce2::Extranonce2;

/// Serialized coinbase: `coinbase1 || extranonce1 || extranonce2 || coinbase2`.
pub fn coinbase(
    coinbase1: &[u8],
    extranonce1: &[u8],
    extranonce2: &Extranonce2,
    coinbase2: &[u8],
) -> Vec<u8> {
    let mut tx = Vec::with_capacity(
        coinbase1.len() + extranonce1.len() + extranonce2.width() + coinbase2.len(),
    );
    tx.extend_from_slice(coinbase1);
    tx.extend_from_slice(extranonce1);
    tx.extend_from_slice(&extranonce2.to_bytes());
    tx.extend_from_slice(coinbase2);
    tx
}

/// Climbs from the coinbase hash to the root, branches in the order given.
///
/// The coinbase is hashed as-is, so it must be the non-witness
/// serialization the pool hands out.
pub fn merkle_root(coinbase: &[u8], branches: &[TxMerkleNode]) -> TxMerkleNode {
    let mut node = sha256d::Hash::hash(coinbase).to_byte_array();
    let mut pair = [0u8; 64];

    for branch in branches {
        pair[..32].copy_from_slice(&node);
        pair[32..].copy_from_slice(branch.as_byte_array());
        node = sha256d::Hash::hash(&pair).to_byte_array();
    }

    TxMerkleNode::from_byte_array(node)
}
