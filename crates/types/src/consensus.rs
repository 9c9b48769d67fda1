//! Consensus data types: the validator set, votes, proposals and the
//! peer-relay wire envelope.

use std::collections::BTreeMap;

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::block::Block;
use crate::codec::to_bytes_canonical;
use crate::tx::TxSignature;
use crate::Hash;

/// The nil vote target: no commit this round.
pub const NIL_HASH: Hash = [0u8; 32];

/// Message-type tags carried on the peer-relay wire envelope.
pub mod wire {
    /// A block proposal.
    pub const PROPOSAL: u16 = 1;
    /// A prevote or precommit.
    pub const VOTE: u16 = 2;
    /// A raw canonical transaction for the mempool.
    pub const TX: u16 = 3;
    /// A signed transaction envelope for the mempool.
    pub const TX_ENVELOPE: u16 = 4;
}

/// The voting step a vote belongs to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub enum VoteStep {
    /// First voting round of a step.
    Prevote,
    /// Second, locking voting round.
    Precommit,
}

/// A prevote or precommit from one validator.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Vote {
    /// Height the vote applies to.
    pub height: u64,
    /// Round within the height.
    pub round: u64,
    /// Prevote or precommit.
    pub step: VoteStep,
    /// Voted block hash, or [`NIL_HASH`] for a nil-vote.
    pub block_hash: Hash,
    /// The voting validator.
    pub validator: Address,
    /// Recoverable signature over [`Vote::sign_bytes`].
    pub signature: TxSignature,
}

impl Vote {
    /// The bytes a validator signs for this vote.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(
            b"nhb/vote/v1".as_slice(),
            self.height,
            self.round,
            &self.step,
            &self.block_hash,
            &self.validator,
        ))
    }

    /// Whether this is a nil-vote.
    pub fn is_nil(&self) -> bool {
        self.block_hash == NIL_HASH
    }
}

/// A proposer's signed block proposal for (height, round).
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Proposal {
    /// Height being proposed.
    pub height: u64,
    /// Round within the height.
    pub round: u64,
    /// The full candidate block.
    pub block: Block,
    /// The proposing validator.
    pub proposer: Address,
    /// Recoverable signature over [`Proposal::sign_bytes`].
    pub signature: TxSignature,
}

impl Proposal {
    /// The bytes the proposer signs: the block is bound via its hash.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(
            b"nhb/proposal/v1".as_slice(),
            self.height,
            self.round,
            &self.block.hash(),
            &self.proposer,
        ))
    }
}

/// Evidence of two conflicting votes from the same validator for the same
/// (height, round, step). Recorded, not acted upon.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct VoteEvidence {
    /// The vote that arrived first and counts for the tally.
    pub first: Vote,
    /// The conflicting later vote.
    pub second: Vote,
}

/// The weighted validator set.
///
/// Powers are keyed by address; total power and the quorum test are
/// recomputed from the map so the set can never disagree with itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ValidatorSet {
    powers: BTreeMap<Address, Amount>,
}

impl ValidatorSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from (address, power) pairs, dropping zero powers.
    pub fn from_entries(entries: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        let mut set = Self::new();
        for (addr, power) in entries {
            set.set_power(addr, power);
        }
        set
    }

    /// Sets a validator's power; zero removes the validator.
    pub fn set_power(&mut self, addr: Address, power: Amount) {
        if power.is_zero() {
            self.powers.remove(&addr);
        } else {
            self.powers.insert(addr, power);
        }
    }

    /// The power of one validator, zero if absent.
    pub fn power_of(&self, addr: &Address) -> Amount {
        self.powers.get(addr).cloned().unwrap_or_else(Amount::zero)
    }

    /// Whether the address is in the set.
    pub fn contains(&self, addr: &Address) -> bool {
        self.powers.contains_key(addr)
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.powers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    /// Sum of all voting power.
    pub fn total_power(&self) -> Amount {
        self.powers.values().cloned().sum()
    }

    /// BFT quorum test: strictly more than 2/3 of total power.
    ///
    /// Computed as `3 * accumulated > 2 * total` to avoid truncating
    /// division on arbitrary-precision weights.
    pub fn quorum_reached(&self, accumulated: &Amount) -> bool {
        accumulated.mul_u64(3) > self.total_power().mul_u64(2)
    }

    /// Validators ordered for proposer selection: descending power,
    /// ascending address as the tie-break.
    pub fn ordered(&self) -> Vec<(Address, Amount)> {
        let mut entries: Vec<(Address, Amount)> = self
            .powers
            .iter()
            .map(|(a, p)| (*a, p.clone()))
            .collect();
        entries.sort_by(|(addr_a, pow_a), (addr_b, pow_b)| {
            pow_b.cmp(pow_a).then_with(|| addr_a.cmp(addr_b))
        });
        entries
    }

    /// Iterates (address, power) in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.powers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn quorum_is_strictly_greater_than_two_thirds() {
        let set = ValidatorSet::from_entries([
            (addr(1), Amount::from(1u64)),
            (addr(2), Amount::from(1u64)),
            (addr(3), Amount::from(1u64)),
        ]);
        // 2 of 3 is exactly 2/3: not a quorum.
        assert!(!set.quorum_reached(&Amount::from(2u64)));
        assert!(set.quorum_reached(&Amount::from(3u64)));
    }

    #[test]
    fn zero_power_removes() {
        let mut set = ValidatorSet::new();
        set.set_power(addr(1), Amount::from(10u64));
        set.set_power(addr(1), Amount::zero());
        assert!(set.is_empty());
    }

    #[test]
    fn ordering_breaks_ties_by_address() {
        let set = ValidatorSet::from_entries([
            (addr(3), Amount::from(5u64)),
            (addr(1), Amount::from(5u64)),
            (addr(2), Amount::from(9u64)),
        ]);
        let ordered: Vec<Address> = set.ordered().into_iter().map(|(a, _)| a).collect();
        assert_eq!(ordered, vec![addr(2), addr(1), addr(3)]);
    }
}
