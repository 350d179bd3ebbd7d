//! Merkle Proof Verification
//!
//! Proofs here are paths in the binary Keccak tree built by
//! [`ordered_root`](lightwire_types::ordered_root): each step names the
//! sibling hash and which side it sits on. Walking the path from the leaf
//! must reproduce the root committed in a trusted header.

use lightwire_types::{keccak256, keccak256_concat, B256};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One level of a Merkle path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level
    pub sibling: B256,
    /// Sibling is the left operand
    pub left: bool,
}

/// Inclusion proof of one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf hash being proven
    pub leaf: B256,
    /// Path from the leaf up to the root
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Create a new Merkle proof
    pub fn new(leaf: B256, path: Vec<ProofStep>) -> Self {
        Self { leaf, path }
    }

    /// Compute the root from the proof nodes
    pub fn compute_root(&self) -> B256 {
        self.path.iter().fold(self.leaf, |current, step| {
            if step.left {
                keccak256_concat(&[step.sibling.as_slice(), current.as_slice()])
            } else {
                keccak256_concat(&[current.as_slice(), step.sibling.as_slice()])
            }
        })
    }

    /// Verify the proof computes to the expected root
    pub fn verify(&self, expected_root: &B256) -> bool {
        let computed = self.compute_root();
        trace!(%computed, expected = %expected_root, "Merkle proof checked");
        computed == *expected_root
    }
}

/// Leaf commitment for a state entry: `keccak(key || keccak(value))`.
///
/// An absent value commits to the hash of the empty string.
pub fn state_leaf(key: &B256, value: Option<&[u8]>) -> B256 {
    let value_hash = keccak256(value.unwrap_or_default());
    keccak256_concat(&[key.as_slice(), value_hash.as_slice()])
}

/// Build the inclusion proof for `leaves[index]`.
///
/// Mirrors [`ordered_root`](lightwire_types::ordered_root), pairing an odd
/// node with itself. Returns `None` if `index` is out of range.
pub fn prove(leaves: &[B256], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut path = Vec::new();
    let mut level: Vec<B256> = leaves.to_vec();
    let mut position = index;
    while level.len() > 1 {
        let sibling_index = position ^ 1;
        let sibling = level.get(sibling_index).copied().unwrap_or(level[position]);
        path.push(ProofStep {
            sibling,
            left: position % 2 == 1,
        });

        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                keccak256_concat(&[pair[0].as_slice(), right.as_slice()])
            })
            .collect();
        position /= 2;
    }

    Some(MerkleProof::new(leaves[index], path))
}
