//! Header and receipt types as seen by a header-only node.
//!
//! A [`LightHeader`] carries the roots that on-demand answers are checked
//! against. Receipts commit to a header through [`ordered_root`], a binary
//! Keccak tree over the receipt hashes in block order.

use alloy_primitives::{keccak256, Keccak256, B256};
use serde::{Deserialize, Serialize};

/// Block number
pub type BlockNumber = u64;

/// Header fields a light node keeps for every verified block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightHeader {
    /// Block number
    pub number: BlockNumber,
    /// Hash of this header (see [`LightHeader::compute_hash`])
    pub hash: B256,
    /// Parent header hash
    pub parent_hash: B256,
    /// Root of the world-state trie after this block
    pub state_root: B256,
    /// Root of the receipts of this block
    pub receipts_root: B256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl LightHeader {
    /// Build a header and fill in its hash.
    pub fn new(
        number: BlockNumber,
        parent_hash: B256,
        state_root: B256,
        receipts_root: B256,
        timestamp: u64,
    ) -> Self {
        let mut header = Self {
            number,
            hash: B256::ZERO,
            parent_hash,
            state_root,
            receipts_root,
            timestamp,
        };
        header.hash = header.compute_hash();
        header
    }

    /// Hash of every field except `hash` itself.
    pub fn compute_hash(&self) -> B256 {
        keccak256_concat(&[
            &self.number.to_be_bytes(),
            self.parent_hash.as_slice(),
            self.state_root.as_slice(),
            self.receipts_root.as_slice(),
            &self.timestamp.to_be_bytes(),
        ])
    }

    /// Whether the stored hash matches the header contents.
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to
    pub tx_hash: B256,
    /// 1 on success, 0 on failure
    pub status: u8,
    /// Gas used by the block up to and including this transaction
    pub cumulative_gas_used: u64,
    /// Opaque log payload
    #[serde(with = "hex_bytes")]
    pub logs: Vec<u8>,
}

impl Receipt {
    /// Commitment hash for this receipt.
    pub fn hash(&self) -> B256 {
        keccak256_concat(&[
            self.tx_hash.as_slice(),
            &[self.status],
            &self.cumulative_gas_used.to_be_bytes(),
            keccak256(&self.logs).as_slice(),
        ])
    }
}

/// Keccak-256 over `parts` fed in order, without concatenating them first.
pub fn keccak256_concat(parts: &[&[u8]]) -> B256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Root over the receipt hashes of a block, in order.
pub fn receipts_root(receipts: &[Receipt]) -> B256 {
    let leaves: Vec<B256> = receipts.iter().map(Receipt::hash).collect();
    ordered_root(&leaves)
}

/// Binary Keccak tree root over `leaves`.
///
/// An odd node at any level is paired with itself. The root of an empty list
/// is the hash of the empty string.
pub fn ordered_root(leaves: &[B256]) -> B256 {
    if leaves.is_empty() {
        return keccak256(b"");
    }

    let mut level: Vec<B256> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                keccak256_concat(&[pair[0].as_slice(), right.as_slice()])
            })
            .collect();
    }
    level[0]
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
