//! Double-SHA256 merkle tree over transaction IDs.
//!
//! The root commits a block header to its transaction set: leaves are the
//! txids themselves (already 32-byte digests), internal nodes are
//! `dsha256(left ‖ right)`, and odd layers duplicate their last element.
//! An empty set produces the zero hash; a single txid is its own root.

use serde::{Deserialize, Serialize};

use crate::hash::{Hash256, dsha256};

/// Hash a pair of child nodes: `dsha256(left ‖ right)`.
fn pair_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    dsha256(&data)
}

/// Compute the next layer of the tree from the current one.
///
/// Pairs adjacent hashes, duplicating the last when the layer is odd.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(pair_hash(left, right));
        i += 2;
    }
    next
}

/// Compute the merkle root over a slice of transaction IDs.
///
/// Returns [`Hash256::ZERO`] for an empty slice and the txid itself for a
/// single-element slice.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    match txids.len() {
        0 => Hash256::ZERO,
        1 => txids[0],
        _ => {
            let mut current = txids.to_vec();
            while current.len() > 1 {
                current = next_layer(&current);
            }
            current[0]
        }
    }
}

/// Inclusion proof for a single transaction ID.
///
/// `siblings` holds the sibling hash at each level, bottom to top. During
/// verification the side of each sibling is recovered from the low bit of
/// the level-local index, which halves per level.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct MerkleProof {
    /// Index of the proven leaf within the original txid list.
    pub leaf_index: usize,
    /// Sibling hashes from leaf level up to just below the root.
    pub siblings: Vec<Hash256>,
}

/// Generate an inclusion proof for the txid at `index`.
///
/// Returns `None` when the index is out of bounds or the list is empty.
pub fn merkle_proof(txids: &[Hash256], index: usize) -> Option<MerkleProof> {
    if txids.is_empty() || index >= txids.len() {
        return None;
    }

    let mut siblings = Vec::new();
    let mut layer = txids.to_vec();
    let mut pos = index;

    while layer.len() > 1 {
        let sibling_pos = pos ^ 1;
        let sibling = if sibling_pos < layer.len() {
            layer[sibling_pos]
        } else {
            // Odd layer: the last element pairs with itself.
            layer[pos]
        };
        siblings.push(sibling);
        layer = next_layer(&layer);
        pos /= 2;
    }

    Some(MerkleProof { leaf_index: index, siblings })
}

/// Verify an inclusion proof by replaying the walk from leaf to root.
pub fn verify_proof(txid: &Hash256, root: &Hash256, proof: &MerkleProof) -> bool {
    let mut current = *txid;
    let mut pos = proof.leaf_index;

    for sibling in &proof.siblings {
        current = if pos & 1 == 1 {
            pair_hash(sibling, &current)
        } else {
            pair_hash(&current, sibling)
        };
        pos >>= 1;
    }

    current == *root
}
