//! Staking: bond, unbond with a maturity delay, claim.
//!
//! Stake changes feed the validator set; the processor surfaces the new
//! totals through `ModuleCtx::validator_changes` and the node recomputes
//! quorum weights on commit.

use nhb_api::storage::StateAccess;
use nhb_types::account::Unbond;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::unbond_key;
use nhb_types::tx::Module;

use super::ModuleCtx;
use crate::accounts::{debit_native, get_account, put_account};
use crate::events::Event;

fn load_unbonds(state: &dyn StateAccess, ctx: &ModuleCtx<'_>) -> Result<Vec<Unbond>, TxError> {
    match state.get(&unbond_key(&ctx.sender))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Vec::new()),
    }
}

/// Bonds `amount` from the sender's native balance into stake.
pub fn apply_stake(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(TxError::InvalidAmount("stake must be positive".to_string()));
    }
    let mut account = get_account(state, &ctx.sender)?;
    debit_native(&mut account, amount)?;
    account.stake += amount;
    let new_stake = account.stake.clone();
    put_account(state, &ctx.sender, &account)?;

    ctx.validator_changes.push((ctx.sender, new_stake.clone()));
    ctx.emit(Event::new(
        "staking.bonded",
        vec![
            ("validator".to_string(), ctx.sender.to_string()),
            ("stake".to_string(), new_stake.to_string()),
        ],
    ));
    Ok(())
}

/// Begins unbonding `amount`; the funds mature after the unbonding period.
pub fn apply_unstake(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(TxError::InvalidAmount(
            "unstake must be positive".to_string(),
        ));
    }
    let mut account = get_account(state, &ctx.sender)?;
    account.stake = account.stake.checked_sub(amount).ok_or(TxError::ModuleError {
        module: Module::Staking,
        reason: "unstake exceeds bonded stake".to_string(),
    })?;
    let new_stake = account.stake.clone();
    put_account(state, &ctx.sender, &account)?;

    let mut unbonds = load_unbonds(state, ctx)?;
    unbonds.push(Unbond {
        amount: amount.clone(),
        release_time: ctx.timestamp + ctx.policy.unbonding_period_secs,
    });
    state.insert(&unbond_key(&ctx.sender), &to_bytes_canonical(&unbonds))?;

    ctx.validator_changes.push((ctx.sender, new_stake.clone()));
    ctx.emit(Event::new(
        "staking.unbonding",
        vec![
            ("validator".to_string(), ctx.sender.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("stake".to_string(), new_stake.to_string()),
        ],
    ));
    Ok(())
}

/// Claims every matured unbond back into the native balance.
pub fn apply_stake_claim(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
) -> Result<(), TxError> {
    let unbonds = load_unbonds(state, ctx)?;
    let (matured, pending): (Vec<Unbond>, Vec<Unbond>) = unbonds
        .into_iter()
        .partition(|u| u.release_time <= ctx.timestamp);
    if matured.is_empty() {
        return Err(TxError::ModuleError {
            module: Module::Staking,
            reason: "no matured unbonds to claim".to_string(),
        });
    }

    let total: Amount = matured.into_iter().map(|u| u.amount).sum();
    let mut account = get_account(state, &ctx.sender)?;
    account.balance += &total;
    put_account(state, &ctx.sender, &account)?;

    if pending.is_empty() {
        state.remove(&unbond_key(&ctx.sender))?;
    } else {
        state.insert(&unbond_key(&ctx.sender), &to_bytes_canonical(&pending))?;
    }

    ctx.emit(Event::new(
        "staking.claimed",
        vec![
            ("validator".to_string(), ctx.sender.to_string()),
            ("amount".to_string(), total.to_string()),
        ],
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Overlay, ScratchView};
    use crate::policy::PolicySnapshot;
    use nhb_storage::MemStore;
    use nhb_types::account::Account;
    use nhb_types::address::Address;
    use nhb_types::config::NodeConfig;

    fn policy() -> PolicySnapshot {
        let mut snapshot = PolicySnapshot::from_config(&test_config());
        snapshot.unbonding_period_secs = 100;
        snapshot
    }

    fn test_config() -> NodeConfig {
        // Only the policy-relevant fields matter here.
        toml::from_str(
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
        .unwrap()
    }

    fn seeded_block(addr: &Address, balance: u64) -> Overlay {
        let mut block = Overlay::new();
        let account = Account {
            balance: Amount::from(balance),
            ..Account::default()
        };
        block.insert(
            nhb_types::keys::account_key(addr),
            to_bytes_canonical(&account),
        );
        block
    }

    #[test]
    fn bond_unbond_claim_lifecycle() {
        let store = MemStore::new();
        let sender = Address([4; 20]);
        let block = seeded_block(&sender, 1_000);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(sender, 1, 1_000, &policy);
        apply_stake(&mut view, &mut ctx, &Amount::from(600u64)).unwrap();
        assert_eq!(ctx.validator_changes, vec![(sender, Amount::from(600u64))]);

        let mut ctx = ModuleCtx::new(sender, 2, 1_010, &policy);
        apply_unstake(&mut view, &mut ctx, &Amount::from(200u64)).unwrap();
        assert_eq!(ctx.validator_changes, vec![(sender, Amount::from(400u64))]);

        // Too early to claim.
        let mut ctx = ModuleCtx::new(sender, 3, 1_050, &policy);
        assert!(apply_stake_claim(&mut view, &mut ctx).is_err());

        // Past the unbonding period the funds return.
        let mut ctx = ModuleCtx::new(sender, 4, 1_200, &policy);
        apply_stake_claim(&mut view, &mut ctx).unwrap();
        let account = get_account(&view, &sender).unwrap();
        assert_eq!(account.balance, Amount::from(600u64));
        assert_eq!(account.stake, Amount::from(400u64));
    }

    #[test]
    fn unstake_cannot_exceed_stake() {
        let store = MemStore::new();
        let sender = Address([4; 20]);
        let block = seeded_block(&sender, 100);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(sender, 1, 1_000, &policy);
        apply_stake(&mut view, &mut ctx, &Amount::from(100u64)).unwrap();
        let mut ctx = ModuleCtx::new(sender, 2, 1_001, &policy);
        assert!(matches!(
            apply_unstake(&mut view, &mut ctx, &Amount::from(101u64)),
            Err(TxError::ModuleError { .. })
        ));
    }
}
