//! Voucher-backed minting with annual emission caps.

use nhb_api::storage::StateAccess;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::{minter_role, mint_invoice_key, mint_ledger_key};
use nhb_types::tx::MintVoucher;

use super::{has_role, ModuleCtx};
use crate::accounts::{get_account, put_account};
use crate::events::Event;
use crate::policy::year_of;

/// Reads the year-to-date minted sum for `(token, year)`.
pub fn ytd_minted(
    state: &dyn StateAccess,
    token: &str,
    year: i32,
) -> Result<Amount, TxError> {
    match state.get(&mint_ledger_key(token, year))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Amount::zero()),
    }
}

/// Applies a mint transaction.
///
/// The voucher must be signed by a holder of `MINTER_<token>`, unexpired,
/// unconsumed and within this chain. The credit is refused outright when the
/// year-to-date emission plus the voucher amount would exceed the token's
/// cap; nothing is written on failure.
pub fn apply_mint(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    voucher: &MintVoucher,
    voucher_sig: &[u8],
) -> Result<(), TxError> {
    if voucher.chain_id != ctx.policy.chain_id {
        return Err(TxError::ChainIdMismatch {
            expected: ctx.policy.chain_id.to_string(),
            got: voucher.chain_id.to_string(),
        });
    }
    if voucher.expiry <= ctx.timestamp {
        return Err(TxError::ExpiredVoucher {
            expiry: voucher.expiry,
            now: ctx.timestamp,
        });
    }
    if voucher.amount.is_zero() {
        return Err(TxError::InvalidAmount(
            "mint amount must be positive".to_string(),
        ));
    }

    let signer = nhb_crypto::recover_address_bytes(&voucher.sign_bytes(), voucher_sig)?;
    let role = minter_role(&voucher.token);
    if !has_role(state, &role, &signer)? {
        return Err(TxError::RoleMissing(role));
    }

    let invoice_key = mint_invoice_key(&voucher.invoice_id);
    if state.get(&invoice_key)?.is_some() {
        return Err(TxError::InvoiceConsumed(voucher.invoice_id.clone()));
    }

    let year = year_of(ctx.timestamp);
    let ytd = ytd_minted(state, &voucher.token, year)?;
    let next = ytd.checked_add(&voucher.amount);
    if let Some(cap) = ctx.policy.emission_cap(&voucher.token) {
        if next > *cap {
            return Err(TxError::EmissionCapExceeded {
                token: voucher.token.clone(),
            });
        }
    }

    let mut recipient = get_account(state, &voucher.recipient)?;
    match voucher.token.as_str() {
        "NHB" => recipient.balance += &voucher.amount,
        "ZNHB" => recipient.balance_wrapped += &voucher.amount,
        other => {
            return Err(TxError::InvalidAmount(format!(
                "unknown mintable token: {other}"
            )))
        }
    }
    put_account(state, &voucher.recipient, &recipient)?;
    state.insert(&invoice_key, &[1u8])?;
    state.insert(
        &mint_ledger_key(&voucher.token, year),
        &to_bytes_canonical(&next),
    )?;

    ctx.emit(Event::new(
        "mint.credited",
        vec![
            ("invoice".to_string(), voucher.invoice_id.clone()),
            ("token".to_string(), voucher.token.clone()),
            ("amount".to_string(), voucher.amount.to_string()),
            ("recipient".to_string(), voucher.recipient.to_string()),
        ],
    ));
    Ok(())
}
