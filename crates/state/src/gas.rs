//! Intrinsic gas accounting.

use nhb_types::amount::Amount;
use nhb_types::tx::Transaction;

/// Flat cost charged to every transaction.
pub const BASE_GAS: u64 = 21_000;

/// Cost per byte of auxiliary data.
pub const DATA_BYTE_GAS: u64 = 16;

/// The gas a transaction consumes. Native module dispatch is flat-priced;
/// only the data payload scales the cost.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    BASE_GAS.saturating_add(DATA_BYTE_GAS.saturating_mul(tx.header.data.len() as u64))
}

/// The maximum the payer may be charged: `gas_price * gas_limit`.
pub fn max_gas_cost(tx: &Transaction) -> Amount {
    tx.header.gas_price.mul_u64(tx.header.gas_limit)
}

/// The cost actually charged: `gas_price * gas_used`.
pub fn gas_cost(tx: &Transaction, gas_used: u64) -> Amount {
    tx.header.gas_price.mul_u64(gas_used)
}
