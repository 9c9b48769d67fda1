//! Escrow lifecycle: create, fund, release, refund, dispute, resolve.

use parity_scale_codec::{Decode, Encode};

use nhb_api::storage::StateAccess;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::hashing::keccak256_concat;
use nhb_types::keys::{escrow_key, ARBITER_ROLE};
use nhb_types::tx::Module;
use nhb_types::Hash;

use super::{has_role, ModuleCtx};
use crate::accounts::{debit_native, get_account, put_account};
use crate::events::Event;

/// Lifecycle state of an escrow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum EscrowStatus {
    /// Funded and releasable.
    Open,
    /// Frozen pending arbitration.
    Disputed,
    /// Paid out to the payee; terminal.
    Released,
    /// Returned to the payer; terminal.
    Refunded,
}

/// A stored escrow record.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Escrow {
    /// Account that opened and funded the escrow.
    pub payer: Address,
    /// Account paid on release.
    pub payee: Address,
    /// Funds currently held.
    pub amount: Amount,
    /// After this time the payer may refund unilaterally.
    pub deadline: i64,
    /// Lifecycle state.
    pub status: EscrowStatus,
}

fn err(reason: impl Into<String>) -> TxError {
    TxError::ModuleError {
        module: Module::Escrow,
        reason: reason.into(),
    }
}

/// Deterministic escrow id: keccak(payer ∥ nonce).
pub fn escrow_id(payer: &Address, nonce: u64) -> Hash {
    keccak256_concat(&[payer.as_ref(), &nonce.to_be_bytes()])
}

fn load(state: &dyn StateAccess, id: &Hash) -> Result<Escrow, TxError> {
    match state.get(&escrow_key(id))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Err(err(format!("unknown escrow {}", hex::encode(id)))),
    }
}

fn store(state: &mut dyn StateAccess, id: &Hash, escrow: &Escrow) -> Result<(), TxError> {
    state.insert(&escrow_key(id), &to_bytes_canonical(escrow))?;
    Ok(())
}

/// Opens an escrow funded with `amount`; the id derives from the sender and
/// their nonce, so it is unique per transaction.
pub fn apply_create(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    nonce: u64,
    payee: &Address,
    deadline: i64,
    amount: &Amount,
) -> Result<Hash, TxError> {
    if amount.is_zero() {
        return Err(err("escrow must be funded with a positive amount"));
    }
    if deadline <= ctx.timestamp {
        return Err(err("escrow deadline must be in the future"));
    }
    let id = escrow_id(&ctx.sender, nonce);
    if state.get(&escrow_key(&id))?.is_some() {
        return Err(err("escrow id collision"));
    }

    let mut payer = get_account(state, &ctx.sender)?;
    debit_native(&mut payer, amount)?;
    put_account(state, &ctx.sender, &payer)?;

    store(
        state,
        &id,
        &Escrow {
            payer: ctx.sender,
            payee: *payee,
            amount: amount.clone(),
            deadline,
            status: EscrowStatus::Open,
        },
    )?;

    ctx.emit(Event::new(
        "escrow.created",
        vec![
            ("id".to_string(), hex::encode(id)),
            ("payee".to_string(), payee.to_string()),
            ("amount".to_string(), amount.to_string()),
        ],
    ));
    Ok(id)
}

/// Adds funds to an open escrow; only the payer may top up.
pub fn apply_fund(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    id: &Hash,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("fund amount must be positive"));
    }
    let mut escrow = load(state, id)?;
    if escrow.status != EscrowStatus::Open {
        return Err(err("escrow is not open"));
    }
    if escrow.payer != ctx.sender {
        return Err(err("only the payer may fund"));
    }

    let mut payer = get_account(state, &ctx.sender)?;
    debit_native(&mut payer, amount)?;
    put_account(state, &ctx.sender, &payer)?;

    escrow.amount += amount;
    store(state, id, &escrow)?;

    ctx.emit(Event::new(
        "escrow.funded",
        vec![
            ("id".to_string(), hex::encode(id)),
            ("amount".to_string(), amount.to_string()),
        ],
    ));
    Ok(())
}

fn pay_out(
    state: &mut dyn StateAccess,
    escrow: &mut Escrow,
    to_payee: bool,
) -> Result<(), TxError> {
    let recipient = if to_payee { escrow.payee } else { escrow.payer };
    let mut account = get_account(state, &recipient)?;
    account.balance += &escrow.amount;
    put_account(state, &recipient, &account)?;
    escrow.amount = Amount::zero();
    escrow.status = if to_payee {
        EscrowStatus::Released
    } else {
        EscrowStatus::Refunded
    };
    Ok(())
}

/// Releases the escrow to the payee; only the payer may release.
pub fn apply_release(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    id: &Hash,
) -> Result<(), TxError> {
    let mut escrow = load(state, id)?;
    if escrow.status != EscrowStatus::Open {
        return Err(err("escrow is not open"));
    }
    if escrow.payer != ctx.sender {
        return Err(err("only the payer may release"));
    }
    pay_out(state, &mut escrow, true)?;
    store(state, id, &escrow)?;
    ctx.emit(Event::new(
        "escrow.released",
        vec![("id".to_string(), hex::encode(id))],
    ));
    Ok(())
}

/// Refunds the escrow to the payer, allowed once the deadline passed.
pub fn apply_refund(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    id: &Hash,
) -> Result<(), TxError> {
    let mut escrow = load(state, id)?;
    if escrow.status != EscrowStatus::Open {
        return Err(err("escrow is not open"));
    }
    if escrow.payer != ctx.sender {
        return Err(err("only the payer may refund"));
    }
    if ctx.timestamp < escrow.deadline {
        return Err(err("escrow deadline has not passed"));
    }
    pay_out(state, &mut escrow, false)?;
    store(state, id, &escrow)?;
    ctx.emit(Event::new(
        "escrow.refunded",
        vec![("id".to_string(), hex::encode(id))],
    ));
    Ok(())
}

/// Flags the escrow as disputed; either party may dispute an open escrow.
pub fn apply_dispute(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    id: &Hash,
) -> Result<(), TxError> {
    let mut escrow = load(state, id)?;
    if escrow.status != EscrowStatus::Open {
        return Err(err("escrow is not open"));
    }
    if escrow.payer != ctx.sender && escrow.payee != ctx.sender {
        return Err(err("only a party to the escrow may dispute"));
    }
    escrow.status = EscrowStatus::Disputed;
    store(state, id, &escrow)?;
    ctx.emit(Event::new(
        "escrow.disputed",
        vec![("id".to_string(), hex::encode(id))],
    ));
    Ok(())
}

/// Resolves a disputed escrow either way; requires the arbiter role.
pub fn apply_resolve(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    id: &Hash,
    release_to_payee: bool,
) -> Result<(), TxError> {
    if !has_role(state, ARBITER_ROLE, &ctx.sender)? {
        return Err(TxError::RoleMissing(ARBITER_ROLE.to_string()));
    }
    let mut escrow = load(state, id)?;
    if escrow.status != EscrowStatus::Disputed {
        return Err(err("escrow is not disputed"));
    }
    pay_out(state, &mut escrow, release_to_payee)?;
    store(state, id, &escrow)?;
    ctx.emit(Event::new(
        "escrow.resolved",
        vec![
            ("id".to_string(), hex::encode(id)),
            ("to_payee".to_string(), release_to_payee.to_string()),
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
    use nhb_storage::MemStore;
    use nhb_types::account::Account;

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

    fn setup(payer: Address, balance: u64) -> (MemStore, Overlay) {
        let store = MemStore::new();
        let mut block = Overlay::new();
        block.insert(
            nhb_types::keys::account_key(&payer),
            to_bytes_canonical(&Account {
                balance: Amount::from(balance),
                ..Account::default()
            }),
        );
        (store, block)
    }

    #[test]
    fn create_release_pays_payee() {
        let payer = Address([1; 20]);
        let payee = Address([2; 20]);
        let (store, block) = setup(payer, 500);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(payer, 1, 100, &policy);
        let id = apply_create(&mut view, &mut ctx, 0, &payee, 1_000, &Amount::from(300u64))
            .unwrap();
        apply_release(&mut view, &mut ctx, &id).unwrap();

        assert_eq!(
            get_account(&view, &payee).unwrap().balance,
            Amount::from(300u64)
        );
        assert_eq!(
            get_account(&view, &payer).unwrap().balance,
            Amount::from(200u64)
        );
        // Terminal states refuse further transitions.
        assert!(apply_release(&mut view, &mut ctx, &id).is_err());
    }

    #[test]
    fn refund_waits_for_deadline() {
        let payer = Address([1; 20]);
        let payee = Address([2; 20]);
        let (store, block) = setup(payer, 500);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(payer, 1, 100, &policy);
        let id =
            apply_create(&mut view, &mut ctx, 0, &payee, 1_000, &Amount::from(300u64)).unwrap();
        assert!(apply_refund(&mut view, &mut ctx, &id).is_err());

        let mut late_ctx = ModuleCtx::new(payer, 2, 1_001, &policy);
        apply_refund(&mut view, &mut late_ctx, &id).unwrap();
        assert_eq!(
            get_account(&view, &payer).unwrap().balance,
            Amount::from(500u64)
        );
    }

    #[test]
    fn dispute_locks_until_arbiter_resolves() {
        let payer = Address([1; 20]);
        let payee = Address([2; 20]);
        let arbiter = Address([3; 20]);
        let (store, block) = setup(payer, 500);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();
        grant_role(&mut view, ARBITER_ROLE, &arbiter).unwrap();

        let mut payer_ctx = ModuleCtx::new(payer, 1, 100, &policy);
        let id = apply_create(&mut view, &mut payer_ctx, 0, &payee, 1_000, &Amount::from(300u64))
            .unwrap();

        let mut payee_ctx = ModuleCtx::new(payee, 1, 101, &policy);
        apply_dispute(&mut view, &mut payee_ctx, &id).unwrap();

        // Disputed escrows can be neither released nor refunded by the payer.
        let mut late_payer = ModuleCtx::new(payer, 2, 2_000, &policy);
        assert!(apply_release(&mut view, &mut late_payer, &id).is_err());
        assert!(apply_refund(&mut view, &mut late_payer, &id).is_err());

        // A non-arbiter cannot resolve.
        assert!(matches!(
            apply_resolve(&mut view, &mut payee_ctx, &id, true),
            Err(TxError::RoleMissing(_))
        ));

        let mut arbiter_ctx = ModuleCtx::new(arbiter, 2, 2_000, &policy);
        apply_resolve(&mut view, &mut arbiter_ctx, &id, true).unwrap();
        assert_eq!(
            get_account(&view, &payee).unwrap().balance,
            Amount::from(300u64)
        );
    }
}
