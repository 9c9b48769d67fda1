//! The deterministic state processor.

use std::sync::Arc;

use tracing::debug;

use nhb_api::storage::{KvStore, StateAccess};
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::consensus::ValidatorSet;
use nhb_types::error::TxError;
use nhb_types::genesis::Genesis;
use nhb_types::keys::VALIDATOR_SET_KEY;
use nhb_types::tx::{ParamChange, Transaction, TxPayload};
use nhb_types::Hash;

use crate::accounts::{debit_native, get_account, put_account};
use crate::events::Event;
use crate::gas::{gas_cost, intrinsic_gas, max_gas_cost};
use crate::modules::{self, grant_role, ModuleCtx};
use crate::overlay::{compute_state_root, Overlay, ScratchView};
use crate::policy::{charge_paymaster_caps, check_and_bump_quota, PolicySnapshot};

/// Outcome of applying one transaction.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    /// The recovered sender.
    pub sender: Address,
    /// Gas consumed.
    pub gas_used: u64,
    /// Gas actually charged, `gas_used * gas_price`.
    pub gas_cost: Amount,
    /// Events the transaction emitted.
    pub events: Vec<Event>,
}

/// Cross-cutting effects of a processed block.
#[derive(Clone, Debug, Default)]
pub struct BlockEffects {
    /// New stake totals per touched validator, applied to the validator set
    /// at commit.
    pub validator_changes: Vec<(Address, Amount)>,
    /// Governance parameter changes executed in the block.
    pub param_changes: Vec<ParamChange>,
    /// Every event emitted in the block, in order.
    pub events: Vec<Event>,
}

/// Result of `end_block`.
#[derive(Debug)]
pub struct EndBlockOutcome {
    /// Deterministic post-block state root.
    pub state_root: Hash,
    /// The block layer as a store batch; the caller applies it on commit
    /// and discards it on dry-run.
    pub batch: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    /// Cross-cutting effects for the node to apply.
    pub effects: BlockEffects,
}

struct BlockCtx {
    height: u64,
    timestamp: i64,
    overlay: Overlay,
    effects: BlockEffects,
}

/// Applies typed transactions to a block overlay atomically.
///
/// Each transaction runs in its own scratch over the block layer; a failed
/// transaction leaves no trace, including its nonce. The block layer folds
/// into a store batch at end-block.
pub struct StateProcessor {
    store: Arc<dyn KvStore>,
    policy: PolicySnapshot,
    block: Option<BlockCtx>,
}

impl StateProcessor {
    /// A processor over `store` running under `policy`.
    pub fn new(store: Arc<dyn KvStore>, policy: PolicySnapshot) -> Self {
        StateProcessor {
            store,
            policy,
            block: None,
        }
    }

    /// The active policy snapshot.
    pub fn policy(&self) -> &PolicySnapshot {
        &self.policy
    }

    /// Swaps the policy snapshot (governance commit path).
    pub fn set_policy(&mut self, policy: PolicySnapshot) {
        self.policy = policy;
    }

    /// The underlying store handle.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Opens a block context. Any prior, unfinished context is discarded.
    pub fn begin_block(&mut self, height: u64, timestamp: i64) {
        self.block = Some(BlockCtx {
            height,
            timestamp,
            overlay: Overlay::new(),
            effects: BlockEffects::default(),
        });
    }

    /// Applies one transaction to the open block, all-or-nothing.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<TxReceipt, TxError> {
        let block = self
            .block
            .as_mut()
            .ok_or_else(|| TxError::State(nhb_types::error::StateError::Backend(
                "apply_transaction outside begin_block".to_string(),
            )))?;

        // 1. Chain binding.
        if tx.header.chain_id != self.policy.chain_id {
            return Err(TxError::ChainIdMismatch {
                expected: self.policy.chain_id.to_string(),
                got: tx.header.chain_id.to_string(),
            });
        }

        // 2. Known type, module not paused.
        let module = tx.module();
        if self.policy.pauses.is_paused(module) {
            return Err(TxError::Paused(module));
        }

        // 3. Signature and sender recovery.
        let sender = nhb_crypto::verify_transaction(tx)?;

        let mut scratch = ScratchView::new(self.store.as_ref(), &block.overlay);

        // 4. Strict nonce.
        let mut account = get_account(&scratch, &sender)?;
        if tx.header.nonce != account.nonce {
            return Err(TxError::NonceMismatch {
                expected: account.nonce,
                got: tx.header.nonce,
            });
        }

        // 5/6. Gas affordability, on the sender or a sponsoring paymaster.
        let gas_used = intrinsic_gas(tx);
        if tx.header.gas_limit < gas_used {
            return Err(TxError::PolicyRejected(format!(
                "gas limit {} below intrinsic cost {}",
                tx.header.gas_limit, gas_used
            )));
        }
        let limit_cost = max_gas_cost(tx);
        let charged = gas_cost(tx, gas_used);

        let payer = match tx.header.paymaster {
            Some(paymaster_addr) => {
                admit_sponsored(
                    &self.policy,
                    &mut scratch,
                    tx,
                    &paymaster_addr,
                    &charged,
                    block.timestamp,
                )?;
                Some(paymaster_addr)
            }
            None => {
                if limit_cost > account.balance {
                    return Err(TxError::InsufficientBalance);
                }
                None
            }
        };

        // 7. Module quotas.
        check_and_bump_quota(
            &mut scratch,
            &self.policy.quotas,
            module,
            &sender,
            &tx.header.value,
            block.timestamp,
        )?;

        // Advance the nonce and charge gas inside the scratch, so a module
        // failure below rolls both back.
        account.nonce += 1;
        if payer.is_none() {
            debit_native(&mut account, &charged)?;
        }
        put_account(&mut scratch, &sender, &account)?;
        if let Some(paymaster_addr) = payer {
            let mut paymaster = get_account(&scratch, &paymaster_addr)?;
            debit_native(&mut paymaster, &charged).map_err(|_| {
                TxError::PaymasterOverLimit("paymaster balance too low".to_string())
            })?;
            put_account(&mut scratch, &paymaster_addr, &paymaster)?;
        }

        // Module dispatch.
        let mut ctx = ModuleCtx::new(sender, block.height, block.timestamp, &self.policy);
        dispatch(&mut scratch, &mut ctx, tx)?;

        // Success: fold the scratch into the block layer.
        let ModuleCtx {
            events,
            validator_changes,
            param_changes,
            ..
        } = ctx;
        let scratch_overlay = scratch.into_scratch();
        block.overlay.merge(scratch_overlay);
        block.effects.validator_changes.extend(validator_changes);
        block.effects.param_changes.extend(param_changes);
        block.effects.events.extend(events.iter().cloned());

        debug!(
            target: "state",
            height = block.height,
            tx_type = ?tx.tx_type(),
            sender = %sender,
            gas_used,
            "applied transaction"
        );

        Ok(TxReceipt {
            sender,
            gas_used,
            gas_cost: charged,
            events,
        })
    }

    /// Closes the block: computes the post-state root and hands the block
    /// layer back as a batch. The processor holds no context afterwards.
    pub fn end_block(&mut self) -> Result<EndBlockOutcome, TxError> {
        let block = self
            .block
            .take()
            .ok_or_else(|| TxError::State(nhb_types::error::StateError::Backend(
                "end_block outside begin_block".to_string(),
            )))?;
        let state_root = compute_state_root(self.store.as_ref(), &block.overlay)?;
        Ok(EndBlockOutcome {
            state_root,
            batch: block.overlay.into_batch(),
            effects: block.effects,
        })
    }

    /// Dry-runs one transaction against the current head state.
    pub fn simulate(
        &self,
        tx: &Transaction,
        height: u64,
        timestamp: i64,
    ) -> Result<TxReceipt, TxError> {
        let mut probe = StateProcessor {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            block: None,
        };
        probe.begin_block(height, timestamp);
        probe.apply_transaction(tx)
    }

    /// Applies the genesis document directly to the store and returns the
    /// genesis state root and initial validator set.
    pub fn apply_genesis(&self, genesis: &Genesis) -> Result<(Hash, ValidatorSet), TxError> {
        let block = Overlay::new();
        let mut view = ScratchView::new(self.store.as_ref(), &block);

        let mut validators = ValidatorSet::new();
        for alloc in &genesis.alloc {
            let account = nhb_types::account::Account {
                nonce: 0,
                balance: alloc.balance.clone(),
                balance_wrapped: alloc.balance_wrapped.clone(),
                stake: alloc.stake.clone(),
                storage_root: [0u8; 32],
                code_hash: [0u8; 32],
            };
            put_account(&mut view, &alloc.address, &account)?;
            if !alloc.stake.is_zero() {
                validators.set_power(alloc.address, alloc.stake.clone());
            }
        }
        for role in &genesis.roles {
            grant_role(&mut view, &role.role, &role.grantee)?;
        }
        view.insert(VALIDATOR_SET_KEY, &to_bytes_canonical(&validators))?;

        let overlay = view.into_scratch();
        let root = compute_state_root(self.store.as_ref(), &overlay)?;
        self.store.apply_batch(&overlay.into_batch())?;
        Ok((root, validators))
    }
}

fn admit_sponsored(
    policy: &PolicySnapshot,
    scratch: &mut ScratchView<'_>,
    tx: &Transaction,
    paymaster_addr: &Address,
    charged: &Amount,
    timestamp: i64,
) -> Result<(), TxError> {
    if !policy.paymaster.enabled {
        return Err(TxError::PolicyRejected(
            "paymaster sponsorship disabled".to_string(),
        ));
    }
    let co_sig = tx
        .paymaster_signature
        .as_ref()
        .ok_or(TxError::InvalidSignature)?;
    let co_signer = nhb_crypto::recover_address(&tx.paymaster_sign_bytes(), co_sig)?;
    if co_signer != *paymaster_addr {
        return Err(TxError::InvalidSignature);
    }

    charge_paymaster_caps(
        scratch,
        &policy.paymaster,
        &tx.header.merchant_addr,
        &tx.header.device_id,
        charged,
        timestamp,
    )?;

    // Auto top-up before the affordability check, if configured.
    if let Some(top_up) = &policy.paymaster.auto_top_up {
        let paymaster = get_account(scratch, paymaster_addr)?;
        if paymaster.balance < top_up.min_balance {
            let mut treasury = get_account(scratch, &top_up.treasury)?;
            if treasury.balance >= top_up.top_up_amount {
                debit_native(&mut treasury, &top_up.top_up_amount)?;
                put_account(scratch, &top_up.treasury, &treasury)?;
                let mut refreshed = get_account(scratch, paymaster_addr)?;
                refreshed.balance += &top_up.top_up_amount;
                put_account(scratch, paymaster_addr, &refreshed)?;
            }
        }
    }

    let paymaster = get_account(scratch, paymaster_addr)?;
    if *charged > paymaster.balance {
        return Err(TxError::PaymasterOverLimit(
            "paymaster balance too low".to_string(),
        ));
    }
    Ok(())
}

/// Reads the persisted validator set through a state view.
pub fn read_validator_set(state: &dyn StateAccess) -> Result<ValidatorSet, TxError> {
    match state.get(VALIDATOR_SET_KEY)? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(ValidatorSet::new()),
    }
}

fn dispatch(
    scratch: &mut ScratchView<'_>,
    ctx: &mut ModuleCtx<'_>,
    tx: &Transaction,
) -> Result<(), TxError> {
    match &tx.payload {
        TxPayload::Transfer => transfer(scratch, ctx, tx, false),
        TxPayload::TransferWrapped => transfer(scratch, ctx, tx, true),
        TxPayload::Stake => modules::staking::apply_stake(scratch, ctx, &tx.header.value),
        TxPayload::Unstake => modules::staking::apply_unstake(scratch, ctx, &tx.header.value),
        TxPayload::StakeClaim => modules::staking::apply_stake_claim(scratch, ctx),
        TxPayload::Mint {
            voucher,
            voucher_sig,
        } => modules::mint::apply_mint(scratch, ctx, voucher, voucher_sig),
        TxPayload::Heartbeat { .. } => modules::potso::apply_heartbeat(scratch, ctx),
        TxPayload::PaymasterTopUp => paymaster_top_up(scratch, ctx, tx),
        TxPayload::LendSupply => modules::lending::apply_supply(scratch, ctx, &tx.header.value),
        TxPayload::LendBorrow => modules::lending::apply_borrow(scratch, ctx, &tx.header.value),
        TxPayload::LendRepay => modules::lending::apply_repay(scratch, ctx, &tx.header.value),
        TxPayload::LendWithdraw => {
            modules::lending::apply_withdraw(scratch, ctx, &tx.header.value)
        }
        TxPayload::LendLiquidate { borrower } => {
            modules::lending::apply_liquidate(scratch, ctx, borrower, &tx.header.value)
        }
        TxPayload::SwapPayout {
            receipt,
            receipt_sig,
        } => modules::swap::apply_swap_payout(scratch, ctx, receipt, receipt_sig),
        TxPayload::EscrowCreate { payee, deadline } => modules::escrow::apply_create(
            scratch,
            ctx,
            tx.header.nonce,
            payee,
            *deadline,
            &tx.header.value,
        )
        .map(|_| ()),
        TxPayload::EscrowFund { id } => {
            modules::escrow::apply_fund(scratch, ctx, id, &tx.header.value)
        }
        TxPayload::EscrowRelease { id } => modules::escrow::apply_release(scratch, ctx, id),
        TxPayload::EscrowRefund { id } => modules::escrow::apply_refund(scratch, ctx, id),
        TxPayload::EscrowDispute { id } => modules::escrow::apply_dispute(scratch, ctx, id),
        TxPayload::EscrowResolve {
            id,
            release_to_payee,
        } => modules::escrow::apply_resolve(scratch, ctx, id, *release_to_payee),
        TxPayload::GovPropose { change, memo } => {
            modules::governance::apply_propose(scratch, ctx, change, memo).map(|_| ())
        }
        TxPayload::GovVote { proposal, support } => {
            modules::governance::apply_vote(scratch, ctx, *proposal, *support)
        }
        TxPayload::GovExecute { proposal } => {
            let total_stake = read_validator_set(scratch)?.total_power();
            modules::governance::apply_execute(scratch, ctx, *proposal, &total_stake)
        }
    }
}

fn transfer(
    scratch: &mut ScratchView<'_>,
    ctx: &mut ModuleCtx<'_>,
    tx: &Transaction,
    wrapped: bool,
) -> Result<(), TxError> {
    let amount = &tx.header.value;
    if amount.is_zero() {
        return Err(TxError::InvalidAmount(
            "transfer must be positive".to_string(),
        ));
    }
    let mut sender = get_account(scratch, &ctx.sender)?;
    if wrapped {
        crate::accounts::debit_wrapped(&mut sender, amount)?;
    } else {
        debit_native(&mut sender, amount)?;
    }
    put_account(scratch, &ctx.sender, &sender)?;

    let mut recipient = get_account(scratch, &tx.header.to)?;
    if wrapped {
        recipient.balance_wrapped += amount;
    } else {
        recipient.balance += amount;
    }
    put_account(scratch, &tx.header.to, &recipient)?;

    ctx.emit(Event::new(
        "transfer",
        vec![
            ("from".to_string(), ctx.sender.to_string()),
            ("to".to_string(), tx.header.to.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("wrapped".to_string(), wrapped.to_string()),
        ],
    ));
    Ok(())
}

fn paymaster_top_up(
    scratch: &mut ScratchView<'_>,
    ctx: &mut ModuleCtx<'_>,
    tx: &Transaction,
) -> Result<(), TxError> {
    // Operationally a plain transfer into the paymaster's account, kept as
    // its own variant so it can be paused and quota'd independently.
    transfer(scratch, ctx, tx, false)
}
