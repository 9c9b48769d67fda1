//! Deterministic proposer selection.

use nhb_types::address::Address;
use nhb_types::consensus::ValidatorSet;
use nhb_types::hashing::keccak256_concat;
use nhb_types::Hash;

/// Selects the proposer for `(height, round)`.
///
/// Validators are ordered by descending power with ascending address as the
/// tie-break. The base index is seeded by keccak over the last commit hash
/// and the height; the round then rotates through the ordered set, so every
/// validator proposes exactly once over `len` consecutive rounds of a stuck
/// height.
pub fn select_proposer(
    validators: &ValidatorSet,
    last_commit_hash: &Hash,
    height: u64,
    round: u64,
) -> Option<Address> {
    let ordered = validators.ordered();
    if ordered.is_empty() {
        return None;
    }
    let seed = keccak256_concat(&[last_commit_hash.as_slice(), &height.to_be_bytes()]);
    let mut word = [0u8; 8];
    word.copy_from_slice(seed.get(..8)?);
    let base = u64::from_be_bytes(word);
    let index = (base.wrapping_add(round) % ordered.len() as u64) as usize;
    ordered.get(index).map(|(addr, _)| *addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_types::amount::Amount;
    use std::collections::BTreeSet;

    fn three_equal_validators() -> ValidatorSet {
        ValidatorSet::from_entries([
            (Address([0x11; 20]), Amount::from(1u64)),
            (Address([0x22; 20]), Amount::from(1u64)),
            (Address([0x33; 20]), Amount::from(1u64)),
        ])
    }

    #[test]
    fn selection_is_deterministic() {
        let set = three_equal_validators();
        let first = select_proposer(&set, &[0u8; 32], 10, 0);
        for _ in 0..10 {
            assert_eq!(select_proposer(&set, &[0u8; 32], 10, 0), first);
        }
    }

    #[test]
    fn every_validator_proposes_once_across_rounds() {
        let set = three_equal_validators();
        let mut seen = BTreeSet::new();
        for round in 0..3 {
            seen.insert(select_proposer(&set, &[0u8; 32], 10, round).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn seed_depends_on_commit_hash_and_height() {
        let set = three_equal_validators();
        let a = select_proposer(&set, &[0u8; 32], 10, 0);
        let b = select_proposer(&set, &[7u8; 32], 10, 0);
        let c = select_proposer(&set, &[0u8; 32], 11, 0);
        // At least one of the perturbations moves the index for a 3-set;
        // determinism is the property, equality across seeds is not.
        assert!(a != b || a != c || b != c || set.len() == 1);
    }

    #[test]
    fn empty_set_yields_none() {
        assert!(select_proposer(&ValidatorSet::new(), &[0u8; 32], 1, 0).is_none());
    }
}
