//! Governance: stake-weighted parameter-change proposals.
//!
//! Executing a passed proposal surfaces its [`ParamChange`] through the
//! block effects; the node swaps its policy snapshot at commit so RPC
//! readers never observe a half-applied policy.

use std::collections::BTreeSet;

use parity_scale_codec::{Decode, Encode};

use nhb_api::storage::StateAccess;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::{gov_proposal_key, GOV_NEXT_ID_KEY};
use nhb_types::tx::{Module, ParamChange};

use super::ModuleCtx;
use crate::accounts::get_account;
use crate::events::Event;
use crate::policy::PolicySnapshot;

/// A stored governance proposal.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct GovProposal {
    /// Proposal id.
    pub id: u64,
    /// The parameter change being voted on.
    pub change: ParamChange,
    /// Free-form description.
    pub memo: String,
    /// Submitter.
    pub proposer: Address,
    /// Submission time, unix seconds.
    pub submitted_at: i64,
    /// Stake-weighted yes power.
    pub yes_power: Amount,
    /// Stake-weighted no power.
    pub no_power: Amount,
    /// Accounts that have voted.
    pub voters: BTreeSet<Address>,
    /// Whether the proposal has been executed.
    pub executed: bool,
}

fn err(reason: impl Into<String>) -> TxError {
    TxError::ModuleError {
        module: Module::Governance,
        reason: reason.into(),
    }
}

fn load(state: &dyn StateAccess, id: u64) -> Result<GovProposal, TxError> {
    match state.get(&gov_proposal_key(id))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Err(err(format!("unknown proposal {id}"))),
    }
}

fn store(state: &mut dyn StateAccess, proposal: &GovProposal) -> Result<(), TxError> {
    state.insert(&gov_proposal_key(proposal.id), &to_bytes_canonical(proposal))?;
    Ok(())
}

/// Submits a proposal; the change is validated against the current policy
/// so obviously-unknown keys are rejected at submission time.
pub fn apply_propose(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    change: &ParamChange,
    memo: &str,
) -> Result<u64, TxError> {
    let mut probe: PolicySnapshot = ctx.policy.clone();
    probe.apply_param_change(change)?;

    let id: u64 = match state.get(GOV_NEXT_ID_KEY)? {
        Some(bytes) => from_bytes_canonical(&bytes)?,
        None => 1,
    };
    state.insert(GOV_NEXT_ID_KEY, &to_bytes_canonical(&(id + 1)))?;

    store(
        state,
        &GovProposal {
            id,
            change: change.clone(),
            memo: memo.to_string(),
            proposer: ctx.sender,
            submitted_at: ctx.timestamp,
            yes_power: Amount::zero(),
            no_power: Amount::zero(),
            voters: BTreeSet::new(),
            executed: false,
        },
    )?;

    ctx.emit(Event::new(
        "governance.proposed",
        vec![
            ("id".to_string(), id.to_string()),
            ("key".to_string(), change.key.clone()),
        ],
    ));
    Ok(id)
}

/// Casts a stake-weighted vote during the voting period.
pub fn apply_vote(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    proposal_id: u64,
    support: bool,
) -> Result<(), TxError> {
    let mut proposal = load(state, proposal_id)?;
    if proposal.executed {
        return Err(err("proposal already executed"));
    }
    let deadline = proposal.submitted_at + ctx.policy.governance.voting_period_secs;
    if ctx.timestamp >= deadline {
        return Err(err("voting period has ended"));
    }
    if !proposal.voters.insert(ctx.sender) {
        return Err(err("sender already voted"));
    }

    let power = get_account(state, &ctx.sender)?.stake;
    if power.is_zero() {
        return Err(err("voter has no bonded stake"));
    }
    if support {
        proposal.yes_power += &power;
    } else {
        proposal.no_power += &power;
    }
    store(state, &proposal)?;

    ctx.emit(Event::new(
        "governance.voted",
        vec![
            ("id".to_string(), proposal_id.to_string()),
            ("support".to_string(), support.to_string()),
            ("power".to_string(), power.to_string()),
        ],
    ));
    Ok(())
}

/// Executes a proposal after its voting period when quorum was met and yes
/// outweighs no. The change reaches the node through the block effects.
pub fn apply_execute(
    state: &mut dyn StateAccess,
    ctx: &mut ModuleCtx<'_>,
    proposal_id: u64,
    total_stake: &Amount,
) -> Result<(), TxError> {
    let mut proposal = load(state, proposal_id)?;
    if proposal.executed {
        return Err(err("proposal already executed"));
    }
    let deadline = proposal.submitted_at + ctx.policy.governance.voting_period_secs;
    if ctx.timestamp < deadline {
        return Err(err("voting period still open"));
    }

    let participation = proposal.yes_power.checked_add(&proposal.no_power);
    let quorum = total_stake.mul_bps(ctx.policy.governance.quorum_bps);
    if participation < quorum {
        return Err(err("quorum not met"));
    }
    if proposal.yes_power <= proposal.no_power {
        return Err(err("proposal did not pass"));
    }

    proposal.executed = true;
    store(state, &proposal)?;
    ctx.param_changes.push(proposal.change.clone());

    ctx.emit(Event::new(
        "governance.executed",
        vec![
            ("id".to_string(), proposal_id.to_string()),
            ("key".to_string(), proposal.change.key.clone()),
        ],
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::put_account;
    use crate::overlay::{Overlay, ScratchView};
    use nhb_storage::MemStore;
    use nhb_types::account::Account;

    fn policy() -> PolicySnapshot {
        let mut snapshot = PolicySnapshot::from_config(
            &toml::from_str(
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
            .unwrap(),
        );
        snapshot.governance.voting_period_secs = 100;
        snapshot.governance.quorum_bps = 5_000;
        snapshot
    }

    fn staked(view: &mut ScratchView<'_>, addr: Address, stake: u64) {
        put_account(
            view,
            &addr,
            &Account {
                stake: Amount::from(stake),
                ..Account::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn full_proposal_lifecycle() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let voter_a = Address([1; 20]);
        let voter_b = Address([2; 20]);
        staked(&mut view, voter_a, 60);
        staked(&mut view, voter_b, 40);
        let total_stake = Amount::from(100u64);

        let change = ParamChange {
            key: "pauses.swap".to_string(),
            value: "true".to_string(),
        };
        let mut ctx = ModuleCtx::new(voter_a, 1, 0, &policy);
        let id = apply_propose(&mut view, &mut ctx, &change, "pause swaps").unwrap();

        let mut ctx = ModuleCtx::new(voter_a, 1, 10, &policy);
        apply_vote(&mut view, &mut ctx, id, true).unwrap();
        // Double vote rejected.
        assert!(apply_vote(&mut view, &mut ctx, id, true).is_err());

        // Execution before the deadline is refused.
        let mut ctx = ModuleCtx::new(voter_b, 1, 50, &policy);
        assert!(apply_execute(&mut view, &mut ctx, id, &total_stake).is_err());

        let mut ctx = ModuleCtx::new(voter_b, 2, 200, &policy);
        apply_execute(&mut view, &mut ctx, id, &total_stake).unwrap();
        assert_eq!(ctx.param_changes, vec![change]);

        // Re-execution is refused.
        let mut ctx = ModuleCtx::new(voter_b, 3, 300, &policy);
        assert!(apply_execute(&mut view, &mut ctx, id, &total_stake).is_err());
    }

    #[test]
    fn quorum_gates_execution() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let small_voter = Address([3; 20]);
        staked(&mut view, small_voter, 10);
        // 10 of 100 total stake votes: below the 50% quorum.
        let total_stake = Amount::from(100u64);

        let change = ParamChange {
            key: "pauses.swap".to_string(),
            value: "true".to_string(),
        };
        let mut ctx = ModuleCtx::new(small_voter, 1, 0, &policy);
        let id = apply_propose(&mut view, &mut ctx, &change, "").unwrap();
        let mut ctx = ModuleCtx::new(small_voter, 1, 10, &policy);
        apply_vote(&mut view, &mut ctx, id, true).unwrap();

        let mut ctx = ModuleCtx::new(small_voter, 2, 200, &policy);
        let res = apply_execute(&mut view, &mut ctx, id, &total_stake);
        assert!(res.is_err());
        assert!(ctx.param_changes.is_empty());
    }

    #[test]
    fn unknown_parameter_rejected_at_submission() {
        let store = MemStore::new();
        let block = Overlay::new();
        let mut view = ScratchView::new(&store, &block);
        let policy = policy();

        let mut ctx = ModuleCtx::new(Address([1; 20]), 1, 0, &policy);
        let bogus = ParamChange {
            key: "not.a.parameter".to_string(),
            value: "1".to_string(),
        };
        assert!(apply_propose(&mut view, &mut ctx, &bogus, "").is_err());
    }
}
