//! Account state.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::Hash;

/// Per-address account record, created lazily on first reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Account {
    /// Next expected transaction nonce.
    pub nonce: u64,
    /// Native-asset balance.
    pub balance: Amount,
    /// Wrapped-asset balance.
    pub balance_wrapped: Amount,
    /// Bonded stake; mirrored into the validator set.
    pub stake: Amount,
    /// Root of the account's storage, unused by native modules.
    pub storage_root: Hash,
    /// Hash of the account's code, unused by native modules.
    pub code_hash: Hash,
}

/// A stake unbonding entry awaiting maturity.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Unbond {
    /// Amount being unbonded.
    pub amount: Amount,
    /// Unix time at which the unbond may be claimed.
    pub release_time: i64,
}
