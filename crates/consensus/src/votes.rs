//! Power-weighted vote accounting.
//!
//! One [`VoteSet`] per (height, round, step). The first vote from a
//! validator is authoritative; a conflicting second vote is recorded as
//! evidence and never alters the tally, so accounting is independent of
//! arrival order.

use std::collections::BTreeMap;

use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::consensus::{ValidatorSet, Vote, VoteEvidence, VoteStep};
use nhb_types::Hash;

/// Outcome of adding a vote to a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddVote {
    /// First vote from this validator; it counts.
    Added,
    /// Byte-identical duplicate; ignored.
    Duplicate,
    /// Conflicting vote from a validator that already voted differently.
    /// The first vote stands; the pair is returned as evidence.
    Conflict(Box<VoteEvidence>),
}

/// Votes for one (height, round, step).
#[derive(Clone, Debug, Default)]
pub struct VoteSet {
    votes: BTreeMap<Address, Vote>,
}

impl VoteSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vote, deduplicating per validator.
    pub fn add(&mut self, vote: Vote) -> AddVote {
        match self.votes.get(&vote.validator) {
            None => {
                self.votes.insert(vote.validator, vote);
                AddVote::Added
            }
            Some(existing) if existing.block_hash == vote.block_hash => AddVote::Duplicate,
            Some(existing) => AddVote::Conflict(Box::new(VoteEvidence {
                first: existing.clone(),
                second: vote,
            })),
        }
    }

    /// Accumulated power voting for `block_hash`.
    pub fn power_for(&self, validators: &ValidatorSet, block_hash: &Hash) -> Amount {
        self.votes
            .values()
            .filter(|v| v.block_hash == *block_hash)
            .map(|v| validators.power_of(&v.validator))
            .sum()
    }

    /// The block hash (nil included) holding a quorum, if any.
    pub fn quorum_block(&self, validators: &ValidatorSet) -> Option<Hash> {
        let mut tallies: BTreeMap<Hash, Amount> = BTreeMap::new();
        for vote in self.votes.values() {
            let power = validators.power_of(&vote.validator);
            let entry = tallies
                .entry(vote.block_hash)
                .or_insert_with(Amount::zero);
            *entry += &power;
        }
        tallies
            .into_iter()
            .find(|(_, power)| validators.quorum_reached(power))
            .map(|(hash, _)| hash)
    }

    /// Number of distinct voters.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// Whether no votes were recorded.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

/// All vote sets of the current height, keyed by round.
#[derive(Debug, Default)]
pub struct HeightVotes {
    prevotes: BTreeMap<u64, VoteSet>,
    precommits: BTreeMap<u64, VoteSet>,
    /// Conflicting-vote evidence collected this height. Recorded only; a
    /// slashing hook may consume it later.
    pub evidence: Vec<VoteEvidence>,
}

impl HeightVotes {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vote to its (round, step) set; conflicts land in `evidence`.
    pub fn add(&mut self, vote: Vote) -> AddVote {
        let sets = match vote.step {
            VoteStep::Prevote => &mut self.prevotes,
            VoteStep::Precommit => &mut self.precommits,
        };
        let outcome = sets.entry(vote.round).or_default().add(vote);
        if let AddVote::Conflict(evidence) = &outcome {
            self.evidence.push(*evidence.clone());
        }
        outcome
    }

    /// The prevote set for a round, if any votes arrived.
    pub fn prevotes(&self, round: u64) -> Option<&VoteSet> {
        self.prevotes.get(&round)
    }

    /// The precommit set for a round, if any votes arrived.
    pub fn precommits(&self, round: u64) -> Option<&VoteSet> {
        self.precommits.get(&round)
    }

    /// Searches every round of this height for a non-nil precommit quorum.
    pub fn any_precommit_quorum(&self, validators: &ValidatorSet) -> Option<Hash> {
        self.precommits
            .values()
            .filter_map(|set| set.quorum_block(validators))
            .find(|hash| *hash != nhb_types::consensus::NIL_HASH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_types::consensus::NIL_HASH;
    use nhb_types::tx::TxSignature;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn vote(validator: Address, round: u64, step: VoteStep, hash: Hash) -> Vote {
        Vote {
            height: 5,
            round,
            step,
            block_hash: hash,
            validator,
            signature: TxSignature::empty(),
        }
    }

    fn three_validators() -> ValidatorSet {
        ValidatorSet::from_entries([
            (addr(1), Amount::from(1u64)),
            (addr(2), Amount::from(1u64)),
            (addr(3), Amount::from(1u64)),
        ])
    }

    #[test]
    fn quorum_requires_more_than_two_thirds() {
        let validators = three_validators();
        let mut set = VoteSet::new();
        let block = [9u8; 32];

        set.add(vote(addr(1), 0, VoteStep::Prevote, block));
        set.add(vote(addr(2), 0, VoteStep::Prevote, block));
        // 2 of 3 is exactly 2/3: no quorum yet.
        assert_eq!(set.quorum_block(&validators), None);

        set.add(vote(addr(3), 0, VoteStep::Prevote, block));
        assert_eq!(set.quorum_block(&validators), Some(block));
    }

    #[test]
    fn first_vote_is_authoritative() {
        let validators = three_validators();
        let mut set = VoteSet::new();
        let block_a = [0xAA; 32];
        let block_b = [0xBB; 32];

        assert_eq!(set.add(vote(addr(1), 0, VoteStep::Prevote, block_a)), AddVote::Added);
        assert_eq!(
            set.add(vote(addr(1), 0, VoteStep::Prevote, block_a)),
            AddVote::Duplicate
        );
        let outcome = set.add(vote(addr(1), 0, VoteStep::Prevote, block_b));
        assert!(matches!(outcome, AddVote::Conflict(_)));

        // The conflicting vote did not move any tally.
        assert_eq!(set.power_for(&validators, &block_a), Amount::from(1u64));
        assert_eq!(set.power_for(&validators, &block_b), Amount::zero());
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let validators = three_validators();
        let block = [7u8; 32];
        let votes = [
            vote(addr(1), 0, VoteStep::Prevote, block),
            vote(addr(2), 0, VoteStep::Prevote, NIL_HASH),
            vote(addr(3), 0, VoteStep::Prevote, block),
        ];

        let mut forward = VoteSet::new();
        for v in votes.iter().cloned() {
            forward.add(v);
        }
        let mut reverse = VoteSet::new();
        for v in votes.iter().rev().cloned() {
            reverse.add(v);
        }
        assert_eq!(
            forward.power_for(&validators, &block),
            reverse.power_for(&validators, &block)
        );
        assert_eq!(forward.quorum_block(&validators), reverse.quorum_block(&validators));
    }

    #[test]
    fn precommit_quorum_found_in_any_round() {
        let validators = three_validators();
        let block = [3u8; 32];
        let mut votes = HeightVotes::new();
        // Round 0 stalls on nil, round 1 commits.
        for validator in [addr(1), addr(2), addr(3)] {
            votes.add(vote(validator, 0, VoteStep::Precommit, NIL_HASH));
            votes.add(vote(validator, 1, VoteStep::Precommit, block));
        }
        assert_eq!(votes.any_precommit_quorum(&validators), Some(block));
    }

    #[test]
    fn conflict_evidence_is_recorded() {
        let mut votes = HeightVotes::new();
        votes.add(vote(addr(1), 0, VoteStep::Precommit, [1u8; 32]));
        votes.add(vote(addr(1), 0, VoteStep::Precommit, [2u8; 32]));
        assert_eq!(votes.evidence.len(), 1);
        assert_eq!(votes.evidence[0].first.block_hash, [1u8; 32]);
    }
}
