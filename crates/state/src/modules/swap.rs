//! Swap payouts against receipts signed by the swap authority.
//!
//! The swap engine itself (order books, oracle pricing) runs off-chain; the
//! core only credits payouts whose receipt is signed by a holder of the
//! per-token `SWAP_AUTHORITY_<token>` role and consumes each order id once.

use nhb_api::storage::StateAccess;
use nhb_types::error::TxError;
use nhb_types::keys::{swap_authority_role, swap_order_key};
use nhb_types::tx::SwapReceipt;

use super::{has_role, ModuleCtx};
use crate::accounts::{get_account, put_account};
use crate::events::Event;

/// Applies a swap payout receipt.
pub fn apply_swap_payout(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    receipt: &SwapReceipt,
    receipt_sig: &[u8],
) -> Result<(), TxError> {
    if receipt.amount.is_zero() {
        return Err(TxError::InvalidAmount(
            "swap payout must be positive".to_string(),
        ));
    }

    let signer = nhb_crypto::recover_address_bytes(&receipt.sign_bytes(), receipt_sig)?;
    let role = swap_authority_role(&receipt.token);
    if !has_role(state, &role, &signer)? {
        return Err(TxError::RoleMissing(role));
    }

    let order_key = swap_order_key(&receipt.order_id);
    if state.get(&order_key)?.is_some() {
        return Err(TxError::InvoiceConsumed(receipt.order_id.clone()));
    }

    let mut recipient = get_account(state, &receipt.recipient)?;
    match receipt.token.as_str() {
        "NHB" => recipient.balance += &receipt.amount,
        "ZNHB" => recipient.balance_wrapped += &receipt.amount,
        other => {
            return Err(TxError::InvalidAmount(format!(
                "unknown payout token: {other}"
            )))
        }
    }
    put_account(state, &receipt.recipient, &recipient)?;
    state.insert(&order_key, &[1u8])?;

    ctx.emit(Event::new(
        "swap.payout",
        vec![
            ("order".to_string(), receipt.order_id.clone()),
            ("token".to_string(), receipt.token.clone()),
            ("amount".to_string(), receipt.amount.to_string()),
        ],
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::grant_role;
    use crate::overlay::{Overlay, ScratchView};
    use crate::policy::PolicySnapshot;
    use nhb_crypto::{signature_to_bytes, ValidatorKey};
    use nhb_storage::MemStore;
    use nhb_types::address::Address;
    use nhb_types::amount::Amount;

    fn policy() -> PolicySnapshot {
        let config: nhb_types::config::NodeConfig = toml::from_str(
            r#"
            chain_id = "187001"
            data_dir = "/tmp/nhb-test"
            listen_addr = "127.0.0.1:0"
            p2p_endpoint = "http://127.0.0.1:0"
            [validator_key]
            kind = "kms"
            value = "env:NHB_TEST_KEY"
            "#,
        )
        .unwrap();
        PolicySnapshot::from_config(&config)
    }

    #[test]
    fn payout_consumes_order_once() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();
        let authority = ValidatorKey::random();
        grant_role(&mut view, "SWAP_AUTHORITY_ZNHB", &authority.address()).unwrap();

        let receipt = SwapReceipt {
            order_id: "ord-1".to_string(),
            recipient: Address([8; 20]),
            token: "ZNHB".to_string(),
            amount: Amount::from(250u64),
        };
        let sig = signature_to_bytes(&authority.sign(&receipt.sign_bytes()));

        let mut ctx = ModuleCtx::new(Address([1; 20]), 1, 100, &policy);
        apply_swap_payout(&mut view, &mut ctx, &receipt, &sig).unwrap();
        let account = get_account(&view, &Address([8; 20])).unwrap();
        assert_eq!(account.balance_wrapped, Amount::from(250u64));

        assert!(matches!(
            apply_swap_payout(&mut view, &mut ctx, &receipt, &sig),
            Err(TxError::InvoiceConsumed(_))
        ));
    }
}
