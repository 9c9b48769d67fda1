//! Genesis document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::error::ConfigError;

/// A pre-funded genesis account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// The account address.
    pub address: Address,
    /// Initial native balance.
    #[serde(default)]
    pub balance: Amount,
    /// Initial wrapped balance.
    #[serde(default)]
    pub balance_wrapped: Amount,
    /// Initial bonded stake; mirrored into the validator set.
    #[serde(default)]
    pub stake: Amount,
}

/// A role grant present from genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisRole {
    /// Role name, e.g. `MINTER_NHB`.
    pub role: String,
    /// Account holding the role.
    pub grantee: Address,
}

/// The genesis document the daemon loads (JSON) and the core applies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// The chain id; must match the node configuration.
    pub chain_id: Amount,
    /// Genesis timestamp, unix seconds.
    pub timestamp: i64,
    /// Pre-funded accounts.
    #[serde(default)]
    pub alloc: Vec<GenesisAccount>,
    /// Annual emission caps keyed by token symbol.
    #[serde(default)]
    pub emission_caps: BTreeMap<String, Amount>,
    /// Role grants.
    #[serde(default)]
    pub roles: Vec<GenesisRole>,
}

impl Genesis {
    /// Structural validation: duplicate alloc addresses are configuration
    /// errors, and staked accounts make up the initial validator set so at
    /// least one must exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for account in &self.alloc {
            if !seen.insert(account.address) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate genesis alloc for {}",
                    account.address
                )));
            }
        }
        if !self.alloc.iter().any(|a| !a.stake.is_zero()) {
            return Err(ConfigError::Invalid(
                "genesis has no staked account; validator set would be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// A minimal single-node genesis for operator testing, used only behind
    /// the explicit autogenesis opt-in.
    pub fn autogenesis(chain_id: Amount, validator: Address, timestamp: i64) -> Self {
        Genesis {
            chain_id,
            timestamp,
            alloc: vec![GenesisAccount {
                address: validator,
                balance: Amount::from(1_000_000_000u64),
                balance_wrapped: Amount::zero(),
                stake: Amount::from(1_000_000u64),
            }],
            emission_caps: BTreeMap::new(),
            roles: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_validator_set_rejected() {
        let genesis = Genesis {
            chain_id: Amount::from(1u64),
            timestamp: 0,
            alloc: vec![GenesisAccount {
                address: Address([1; 20]),
                balance: Amount::from(10u64),
                balance_wrapped: Amount::zero(),
                stake: Amount::zero(),
            }],
            emission_caps: BTreeMap::new(),
            roles: Vec::new(),
        };
        assert!(genesis.validate().is_err());
    }

    #[test]
    fn autogenesis_is_valid() {
        let genesis = Genesis::autogenesis(Amount::from(1u64), Address([2; 20]), 1_700_000_000);
        assert!(genesis.validate().is_ok());
    }
}
