//! Canonical state-key namespaces.
//!
//! The persistent store is an opaque byte map; every component builds keys
//! through these helpers so the on-disk layout has a single source of truth.

use crate::address::Address;

/// Prefix for account records: `acct/<20-byte address>`.
pub const ACCOUNT_PREFIX: &[u8] = b"acct/";

/// Prefix for block records: `block/<8-byte big-endian height>`.
pub const BLOCK_PREFIX: &[u8] = b"block/";

/// The canonical chain head: `(height, block hash)`.
pub const CHAIN_HEAD_KEY: &[u8] = b"chain/head";

/// The persisted validator set, canonical list encoding.
pub const VALIDATOR_SET_KEY: &[u8] = b"consensus/validatorset";

/// Prefix for the emission ledger: `mint/<token>/<year>`.
pub const MINT_PREFIX: &[u8] = b"mint/";

/// Prefix for consumed mint invoices.
pub const MINT_INVOICE_PREFIX: &[u8] = b"mintinvoice/";

/// Prefix for role grants: `roles/<role name>`.
pub const ROLE_PREFIX: &[u8] = b"roles/";

/// Prefix for stake unbonding queues.
pub const UNBOND_PREFIX: &[u8] = b"staking/unbond/";

/// Lending module namespace.
pub const LENDING_PREFIX: &[u8] = b"lending/";

/// Swap module namespace.
pub const SWAP_PREFIX: &[u8] = b"swap/";

/// Escrow module namespace.
pub const ESCROW_PREFIX: &[u8] = b"escrow/";

/// POTSO module namespace.
pub const POTSO_PREFIX: &[u8] = b"potso/";

/// Governance module namespace.
pub const GOV_PREFIX: &[u8] = b"gov/";

/// Paymaster accounting namespace.
pub const PAYMASTER_PREFIX: &[u8] = b"paymaster/";

/// Quota counters namespace.
pub const QUOTA_PREFIX: &[u8] = b"quota/";

/// State key for an account record.
pub fn account_key(addr: &Address) -> Vec<u8> {
    [ACCOUNT_PREFIX, addr.as_ref()].concat()
}

/// State key for a block at a height.
pub fn block_key(height: u64) -> Vec<u8> {
    [BLOCK_PREFIX, height.to_be_bytes().as_slice()].concat()
}

/// State key for the year-to-date minted sum of a token.
pub fn mint_ledger_key(token: &str, year: i32) -> Vec<u8> {
    [
        MINT_PREFIX,
        token.as_bytes(),
        b"/",
        year.to_string().as_bytes(),
    ]
    .concat()
}

/// State key marking a consumed mint invoice.
pub fn mint_invoice_key(invoice_id: &str) -> Vec<u8> {
    [MINT_INVOICE_PREFIX, invoice_id.as_bytes()].concat()
}

/// State key for a role's grantee list.
pub fn role_key(role: &str) -> Vec<u8> {
    [ROLE_PREFIX, role.as_bytes()].concat()
}

/// The minter role name for a token.
pub fn minter_role(token: &str) -> String {
    format!("MINTER_{token}")
}

/// The swap payout authority role for a token.
pub fn swap_authority_role(token: &str) -> String {
    format!("SWAP_AUTHORITY_{token}")
}

/// The escrow arbiter role name.
pub const ARBITER_ROLE: &str = "ESCROW_ARBITER";

/// State key for an account's unbonding queue.
pub fn unbond_key(addr: &Address) -> Vec<u8> {
    [UNBOND_PREFIX, addr.as_ref()].concat()
}

/// State key for an account's lending position.
pub fn lending_position_key(addr: &Address) -> Vec<u8> {
    [LENDING_PREFIX, b"pos/", addr.as_ref()].concat()
}

/// State key for the lending pool totals.
pub const LENDING_POOL_KEY: &[u8] = b"lending/pool";

/// State key marking a consumed swap payout order.
pub fn swap_order_key(order_id: &str) -> Vec<u8> {
    [SWAP_PREFIX, b"order/", order_id.as_bytes()].concat()
}

/// State key for an escrow record.
pub fn escrow_key(id: &[u8; 32]) -> Vec<u8> {
    [ESCROW_PREFIX, id.as_slice()].concat()
}

/// State key for a POTSO participant record.
pub fn potso_key(addr: &Address) -> Vec<u8> {
    [POTSO_PREFIX, addr.as_ref()].concat()
}

/// State key for a governance proposal.
pub fn gov_proposal_key(id: u64) -> Vec<u8> {
    [GOV_PREFIX, b"proposal/", id.to_be_bytes().as_slice()].concat()
}

/// State key for the next governance proposal id.
pub const GOV_NEXT_ID_KEY: &[u8] = b"gov/nextid";

/// State key for a paymaster's daily spend bucket.
pub fn paymaster_day_key(scope: &str, id: &str, day: i64) -> Vec<u8> {
    [
        PAYMASTER_PREFIX,
        b"day/",
        scope.as_bytes(),
        b"/",
        id.as_bytes(),
        b"/",
        day.to_string().as_bytes(),
    ]
    .concat()
}

/// State key for a per-address requests-per-minute bucket.
pub fn quota_rpm_key(module: &str, addr: &Address, minute_bucket: i64) -> Vec<u8> {
    [
        QUOTA_PREFIX,
        b"rpm/",
        module.as_bytes(),
        b"/",
        addr.as_ref(),
        b"/",
        minute_bucket.to_string().as_bytes(),
    ]
    .concat()
}

/// State key for a per-address units-per-epoch bucket.
pub fn quota_units_key(module: &str, addr: &Address, epoch: i64) -> Vec<u8> {
    [
        QUOTA_PREFIX,
        b"units/",
        module.as_bytes(),
        b"/",
        addr.as_ref(),
        b"/",
        epoch.to_string().as_bytes(),
    ]
    .concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_key_orders_by_height() {
        assert!(block_key(1) < block_key(2));
        assert!(block_key(255) < block_key(256));
    }

    #[test]
    fn mint_keys_are_disjoint_per_token_year() {
        assert_ne!(mint_ledger_key("NHB", 2026), mint_ledger_key("NHB", 2027));
        assert_ne!(mint_ledger_key("NHB", 2026), mint_ledger_key("ZNHB", 2026));
    }
}
