//! Native transaction modules.
//!
//! Each module exposes pure state functions over a [`StateAccess`] view; the
//! processor gates them behind pause switches and quotas and discards every
//! write when a module errors.

use nhb_api::storage::StateAccess;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::role_key;
use nhb_types::tx::ParamChange;

use crate::events::Event;
use crate::policy::PolicySnapshot;

pub mod escrow;
pub mod governance;
pub mod lending;
pub mod mint;
pub mod potso;
pub mod staking;
pub mod swap;

/// Per-transaction context handed to module state functions.
pub struct ModuleCtx<'a> {
    /// Recovered transaction sender.
    pub sender: Address,
    /// Height of the block being built.
    pub height: u64,
    /// Timestamp of the block being built, unix seconds.
    pub timestamp: i64,
    /// The policy snapshot the block runs under.
    pub policy: &'a PolicySnapshot,
    /// Events emitted by the module.
    pub events: Vec<Event>,
    /// Stake totals changed by this transaction, mirrored into the
    /// validator set at commit.
    pub validator_changes: Vec<(Address, Amount)>,
    /// Governance parameter changes executed by this transaction.
    pub param_changes: Vec<ParamChange>,
}

impl<'a> ModuleCtx<'a> {
    /// A fresh context for one transaction.
    pub fn new(sender: Address, height: u64, timestamp: i64, policy: &'a PolicySnapshot) -> Self {
        ModuleCtx {
            sender,
            height,
            timestamp,
            policy,
            events: Vec::new(),
            validator_changes: Vec::new(),
            param_changes: Vec::new(),
        }
    }

    /// Records an event.
    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Whether `addr` holds `role`.
pub fn has_role(state: &dyn StateAccess, role: &str, addr: &Address) -> Result<bool, TxError> {
    match state.get(&role_key(role))? {
        Some(bytes) => {
            let grantees: Vec<Address> = from_bytes_canonical(&bytes)?;
            Ok(grantees.contains(addr))
        }
        None => Ok(false),
    }
}

/// Grants `role` to `addr`; idempotent.
pub fn grant_role(state: &mut dyn StateAccess, role: &str, addr: &Address) -> Result<(), TxError> {
    let key = role_key(role);
    let mut grantees: Vec<Address> = match state.get(&key)? {
        Some(bytes) => from_bytes_canonical(&bytes)?,
        None => Vec::new(),
    };
    if !grantees.contains(addr) {
        grantees.push(*addr);
        grantees.sort();
        state.insert(&key, &to_bytes_canonical(&grantees))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Overlay, ScratchView};
    use nhb_storage::MemStore;

    #[test]
    fn role_grant_is_idempotent() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let addr = Address([3; 20]);

        assert!(!has_role(&view, "MINTER_NHB", &addr).unwrap());
        grant_role(&mut view, "MINTER_NHB", &addr).unwrap();
        grant_role(&mut view, "MINTER_NHB", &addr).unwrap();
        assert!(has_role(&view, "MINTER_NHB", &addr).unwrap());
        assert!(!has_role(&view, "MINTER_ZNHB", &addr).unwrap());
    }
}
