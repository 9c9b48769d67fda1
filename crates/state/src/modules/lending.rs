//! The lending pool: supply, borrow, repay, withdraw, liquidate.
//!
//! Positions are single-asset (native) with loan-to-value and liquidation
//! thresholds in basis points from the risk configuration. Richer market
//! mechanics (rates, indexes) live outside the consensus core; the processor
//! enforces solvency rules at admission.

use parity_scale_codec::{Decode, Encode};

use nhb_api::storage::StateAccess;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::config::CollateralRouting;
use nhb_types::error::TxError;
use nhb_types::keys::{lending_position_key, LENDING_POOL_KEY};
use nhb_types::tx::Module;

use super::ModuleCtx;
use crate::accounts::{debit_native, get_account, put_account};
use crate::events::Event;

/// One account's lending position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Position {
    /// Collateral supplied to the pool.
    pub supplied: Amount,
    /// Outstanding debt.
    pub borrowed: Amount,
}

/// Aggregate pool totals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Pool {
    /// Total supplied across positions.
    pub total_supplied: Amount,
    /// Total borrowed across positions.
    pub total_borrowed: Amount,
}

fn err(reason: impl Into<String>) -> TxError {
    TxError::ModuleError {
        module: Module::Lending,
        reason: reason.into(),
    }
}

/// Loads a position, defaulting to empty.
pub fn get_position(state: &dyn StateAccess, addr: &Address) -> Result<Position, TxError> {
    match state.get(&lending_position_key(addr))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Position::default()),
    }
}

fn put_position(
    state: &mut dyn StateAccess,
    addr: &Address,
    position: &Position,
) -> Result<(), TxError> {
    state.insert(&lending_position_key(addr), &to_bytes_canonical(position))?;
    Ok(())
}

fn get_pool(state: &dyn StateAccess) -> Result<Pool, TxError> {
    match state.get(LENDING_POOL_KEY)? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Pool::default()),
    }
}

fn put_pool(state: &mut dyn StateAccess, pool: &Pool) -> Result<(), TxError> {
    state.insert(LENDING_POOL_KEY, &to_bytes_canonical(pool))?;
    Ok(())
}

/// Moves `amount` from the sender's balance into their supplied collateral.
pub fn apply_supply(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("supply must be positive"));
    }
    let mut account = get_account(state, &ctx.sender)?;
    debit_native(&mut account, amount)?;
    put_account(state, &ctx.sender, &account)?;

    let mut position = get_position(state, &ctx.sender)?;
    position.supplied += amount;
    put_position(state, &ctx.sender, &position)?;

    let mut pool = get_pool(state)?;
    pool.total_supplied += amount;
    put_pool(state, &pool)?;

    ctx.emit(Event::new(
        "lending.supplied",
        vec![("amount".to_string(), amount.to_string())],
    ));
    Ok(())
}

/// Borrows `amount` against supplied collateral, bounded by the max LTV.
pub fn apply_borrow(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("borrow must be positive"));
    }
    let mut position = get_position(state, &ctx.sender)?;
    let new_debt = position.borrowed.checked_add(amount);
    let ceiling = position.supplied.mul_bps(ctx.policy.lending.max_ltv_bps);
    if new_debt > ceiling {
        return Err(err("borrow exceeds loan-to-value ceiling"));
    }

    let mut pool = get_pool(state)?;
    let liquidity = pool
        .total_supplied
        .checked_sub(&pool.total_borrowed)
        .unwrap_or_else(Amount::zero);
    if *amount > liquidity {
        return Err(err("insufficient pool liquidity"));
    }
    pool.total_borrowed += amount;
    put_pool(state, &pool)?;

    position.borrowed = new_debt;
    put_position(state, &ctx.sender, &position)?;

    let mut account = get_account(state, &ctx.sender)?;
    account.balance += amount;
    put_account(state, &ctx.sender, &account)?;

    ctx.emit(Event::new(
        "lending.borrowed",
        vec![("amount".to_string(), amount.to_string())],
    ));
    Ok(())
}

/// Repays up to `amount` of the sender's outstanding debt.
pub fn apply_repay(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("repay must be positive"));
    }
    let mut position = get_position(state, &ctx.sender)?;
    if position.borrowed.is_zero() {
        return Err(err("no outstanding debt"));
    }
    let repaid = if *amount > position.borrowed {
        position.borrowed.clone()
    } else {
        amount.clone()
    };

    let mut account = get_account(state, &ctx.sender)?;
    debit_native(&mut account, &repaid)?;
    put_account(state, &ctx.sender, &account)?;

    position.borrowed = position
        .borrowed
        .checked_sub(&repaid)
        .unwrap_or_else(Amount::zero);
    put_position(state, &ctx.sender, &position)?;

    let mut pool = get_pool(state)?;
    pool.total_borrowed = pool
        .total_borrowed
        .checked_sub(&repaid)
        .unwrap_or_else(Amount::zero);
    put_pool(state, &pool)?;

    ctx.emit(Event::new(
        "lending.repaid",
        vec![("amount".to_string(), repaid.to_string())],
    ));
    Ok(())
}

/// Withdraws supplied collateral not encumbered by the max LTV.
pub fn apply_withdraw(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("withdraw must be positive"));
    }
    let mut position = get_position(state, &ctx.sender)?;
    let remaining = position
        .supplied
        .checked_sub(amount)
        .ok_or_else(|| err("withdraw exceeds supplied collateral"))?;
    // The remaining collateral must still cover the debt at max LTV.
    if position.borrowed > remaining.mul_bps(ctx.policy.lending.max_ltv_bps) {
        return Err(err("withdrawal would undercollateralise the position"));
    }
    position.supplied = remaining;
    put_position(state, &ctx.sender, &position)?;

    let mut pool = get_pool(state)?;
    pool.total_supplied = pool
        .total_supplied
        .checked_sub(amount)
        .ok_or_else(|| err("pool accounting underflow"))?;
    put_pool(state, &pool)?;

    let mut account = get_account(state, &ctx.sender)?;
    account.balance += amount;
    put_account(state, &ctx.sender, &account)?;

    ctx.emit(Event::new(
        "lending.withdrawn",
        vec![("amount".to_string(), amount.to_string())],
    ));
    Ok(())
}

/// Liquidates an undercollateralised borrower: the liquidator repays
/// `amount` of debt and seizes collateral plus the configured bonus.
pub fn apply_liquidate(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    borrower: &Address,
    amount: &Amount,
) -> Result<(), TxError> {
    if amount.is_zero() {
        return Err(err("liquidation repay must be positive"));
    }
    let mut position = get_position(state, borrower)?;
    let threshold = position
        .supplied
        .mul_bps(ctx.policy.lending.liquidation_threshold_bps);
    if position.borrowed <= threshold {
        return Err(err("position is healthy"));
    }

    let repaid = if *amount > position.borrowed {
        position.borrowed.clone()
    } else {
        amount.clone()
    };
    let bonus_bps = 10_000 + ctx.policy.lending.liquidation_bonus_bps;
    let mut seized = repaid.mul_bps(bonus_bps);
    if seized > position.supplied {
        seized = position.supplied.clone();
    }

    let mut liquidator = get_account(state, &ctx.sender)?;
    debit_native(&mut liquidator, &repaid)?;

    position.borrowed = position
        .borrowed
        .checked_sub(&repaid)
        .unwrap_or_else(Amount::zero);
    position.supplied = position
        .supplied
        .checked_sub(&seized)
        .unwrap_or_else(Amount::zero);
    put_position(state, borrower, &position)?;

    let mut pool = get_pool(state)?;
    pool.total_borrowed = pool
        .total_borrowed
        .checked_sub(&repaid)
        .unwrap_or_else(Amount::zero);
    pool.total_supplied = pool
        .total_supplied
        .checked_sub(&seized)
        .unwrap_or_else(Amount::zero);

    match ctx.policy.lending.collateral_routing {
        CollateralRouting::Liquidator => {
            liquidator.balance += &seized;
        }
        CollateralRouting::Pool => {
            // Seized collateral stays in the pool as fresh liquidity.
            pool.total_supplied += &seized;
        }
    }
    put_pool(state, &pool)?;
    put_account(state, &ctx.sender, &liquidator)?;

    ctx.emit(Event::new(
        "lending.liquidated",
        vec![
            ("borrower".to_string(), borrower.to_string()),
            ("repaid".to_string(), repaid.to_string()),
            ("seized".to_string(), seized.to_string()),
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
            [lending]
            max_ltv_bps = 5000
            liquidation_threshold_bps = 8000
            liquidation_bonus_bps = 1000
            collateral_routing = "liquidator"
            "#,
        )
        .unwrap();
        PolicySnapshot::from_config(&config)
    }

    fn funded(addr: Address, balance: u64) -> (MemStore, Overlay) {
        let store = MemStore::new();
        let mut block = Overlay::new();
        block.insert(
            nhb_types::keys::account_key(&addr),
            to_bytes_canonical(&Account {
                balance: Amount::from(balance),
                ..Account::default()
            }),
        );
        (store, block)
    }

    #[test]
    fn borrow_respects_ltv() {
        let sender = Address([5; 20]);
        let (store, block) = funded(sender, 1_000);
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(sender, 1, 100, &policy);
        apply_supply(&mut view, &mut ctx, &Amount::from(1_000u64)).unwrap();

        // 50% LTV of 1000 supplied = 500 ceiling.
        let mut ctx = ModuleCtx::new(sender, 1, 101, &policy);
        assert!(apply_borrow(&mut view, &mut ctx, &Amount::from(501u64)).is_err());
        apply_borrow(&mut view, &mut ctx, &Amount::from(500u64)).unwrap();

        let position = get_position(&view, &sender).unwrap();
        assert_eq!(position.borrowed, Amount::from(500u64));
    }

    #[test]
    fn healthy_position_cannot_be_liquidated() {
        let borrower = Address([6; 20]);
        let liquidator = Address([7; 20]);
        let (store, mut block) = funded(borrower, 1_000);
        block.insert(
            nhb_types::keys::account_key(&liquidator),
            to_bytes_canonical(&Account {
                balance: Amount::from(1_000u64),
                ..Account::default()
            }),
        );
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(borrower, 1, 100, &policy);
        apply_supply(&mut view, &mut ctx, &Amount::from(1_000u64)).unwrap();
        apply_borrow(&mut view, &mut ctx, &Amount::from(400u64)).unwrap();

        let mut ctx = ModuleCtx::new(liquidator, 1, 101, &policy);
        assert!(matches!(
            apply_liquidate(&mut view, &mut ctx, &borrower, &Amount::from(100u64)),
            Err(TxError::ModuleError { .. })
        ));
    }
}
