//! Blocks and headers.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::codec::to_bytes_canonical;
use crate::hashing::keccak256;
use crate::tx::Transaction;
use crate::Hash;

/// Canonical block header. The block hash is keccak over its encoding.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height; genesis is height 0.
    pub height: u64,
    /// Proposal timestamp, unix seconds.
    pub timestamp: i64,
    /// Hash of the block at `height - 1`.
    pub prev_hash: Hash,
    /// State root after applying this block.
    pub state_root: Hash,
    /// Canonical root of the transaction list.
    pub tx_root: Hash,
    /// The proposer that produced this block.
    pub validator: Address,
}

impl BlockHeader {
    /// Keccak-256 of the canonical header encoding.
    pub fn hash(&self) -> Hash {
        keccak256(&to_bytes_canonical(self))
    }
}

/// A block: header plus ordered transactions.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Block {
    /// Canonical header.
    pub header: BlockHeader,
    /// Transactions in application order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block hash; identical to the header hash.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Canonical root over an ordered transaction list: keccak of the
    /// canonical encoding of the transaction hash sequence.
    pub fn compute_tx_root(transactions: &[Transaction]) -> Hash {
        let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
        keccak256(&to_bytes_canonical(&hashes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            height: 3,
            timestamp: 1_700_000_000,
            prev_hash: [1u8; 32],
            state_root: [2u8; 32],
            tx_root: Block::compute_tx_root(&[]),
            validator: Address([0x11; 20]),
        }
    }

    #[test]
    fn hash_is_stable_and_field_sensitive() {
        let h = header();
        assert_eq!(h.hash(), h.hash());
        let mut other = header();
        other.height = 4;
        assert_ne!(h.hash(), other.hash());
    }

    #[test]
    fn empty_tx_root_is_deterministic() {
        assert_eq!(Block::compute_tx_root(&[]), Block::compute_tx_root(&[]));
    }
}
