//! The round engine: propose → prevote → precommit → commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use nhb_api::chain::ConsensusApi;
use nhb_api::relay::OutboundSink;
use nhb_crypto::{recover_address, verify_vote_signature, ValidatorKey};
use nhb_types::block::Block;
use nhb_types::codec::to_bytes_canonical;
use nhb_types::config::ConsensusTimeouts;
use nhb_types::consensus::{wire, Proposal, ValidatorSet, Vote, VoteEvidence, VoteStep, NIL_HASH};
use nhb_types::error::ConsensusError;
use nhb_types::tx::TxSignature;
use nhb_types::Hash;

use crate::proposer::select_proposer;
use crate::votes::{AddVote, HeightVotes};

/// Engine mailbox capacity. Inputs beyond this apply backpressure to the
/// network dispatch path, never to the engine itself.
const MAILBOX_CAPACITY: usize = 1_024;

/// The engine's position within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Waiting for (or producing) the round's proposal.
    Propose,
    /// First voting phase.
    Prevote,
    /// Locking voting phase.
    Precommit,
    /// Commit executed; settling before the next height.
    Commit,
}

/// Everything that can wake the engine. All inputs are serialised through
/// one mailbox so state transitions happen on a single task.
#[derive(Debug)]
pub enum EngineInput {
    /// A peer's (or our own) block proposal.
    Proposal(Box<Proposal>),
    /// A peer's (or our own) prevote or precommit.
    Vote(Vote),
    /// A step timer fired. Stale tokens are ignored.
    Timeout {
        /// Height the timer was armed at.
        height: u64,
        /// Round the timer was armed at.
        round: u64,
        /// Step the timer was armed at.
        step: Step,
    },
}

/// Cloneable sender half of the engine mailbox.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineInput>,
}

impl EngineHandle {
    /// Enqueues an input; `false` when the engine has shut down.
    pub async fn submit(&self, input: EngineInput) -> bool {
        self.tx.send(input).await.is_ok()
    }
}

/// The BFT round engine. Owns all volatile round state; drives one height
/// at a time against the node façade.
pub struct BftEngine {
    node: Arc<dyn ConsensusApi>,
    outbound: Arc<dyn OutboundSink>,
    key: ValidatorKey,
    timeouts: ConsensusTimeouts,
    mailbox: mpsc::Receiver<EngineInput>,
    self_tx: mpsc::Sender<EngineInput>,
    shutdown: watch::Receiver<bool>,

    height: u64,
    round: u64,
    step: Step,
    validators: ValidatorSet,
    last_commit_hash: Hash,
    locked: Option<(Hash, u64)>,
    valid: Option<(Hash, u64)>,
    votes: HeightVotes,
    proposals: HashMap<u64, Proposal>,
    known_blocks: HashMap<Hash, Block>,
    pending_commit: Option<Hash>,
    evidence_log: Vec<VoteEvidence>,
}

impl BftEngine {
    /// Builds an engine and the handle used to feed it.
    pub fn new(
        node: Arc<dyn ConsensusApi>,
        outbound: Arc<dyn OutboundSink>,
        key: ValidatorKey,
        timeouts: ConsensusTimeouts,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = EngineHandle { tx: tx.clone() };
        let engine = BftEngine {
            node,
            outbound,
            key,
            timeouts,
            mailbox: rx,
            self_tx: tx,
            shutdown,
            height: 0,
            round: 0,
            step: Step::Propose,
            validators: ValidatorSet::new(),
            last_commit_hash: NIL_HASH,
            locked: None,
            valid: None,
            votes: HeightVotes::new(),
            proposals: HashMap::new(),
            known_blocks: HashMap::new(),
            pending_commit: None,
            evidence_log: Vec::new(),
        };
        (engine, handle)
    }

    /// Conflicting-vote evidence collected so far (slashing hook).
    pub fn evidence(&self) -> &[VoteEvidence] {
        &self.evidence_log
    }

    /// Runs until cancelled. A commit failure is fatal: the engine's view of
    /// the chain no longer matches storage, so it returns the error instead
    /// of continuing.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        info!(target: "consensus", validator = %self.key.address(), "engine starting");
        self.enter_new_height().await?;
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                input = self.mailbox.recv() => match input {
                    None => break,
                    Some(input) => self.handle_input(input).await?,
                },
            }
        }
        info!(target: "consensus", height = self.height, "engine stopped");
        Ok(())
    }

    async fn handle_input(&mut self, input: EngineInput) -> Result<(), ConsensusError> {
        match input {
            EngineInput::Proposal(proposal) => self.on_proposal(*proposal).await,
            EngineInput::Vote(vote) => self.on_vote(vote).await,
            EngineInput::Timeout {
                height,
                round,
                step,
            } => self.on_timeout(height, round, step).await,
        }
    }

    async fn enter_new_height(&mut self) -> Result<(), ConsensusError> {
        self.height = self.node.height().await + 1;
        self.validators = self.node.validator_set().await;
        self.last_commit_hash = self.node.last_commit_hash().await;
        self.round = 0;
        self.locked = None;
        self.valid = None;
        let finished = std::mem::take(&mut self.votes);
        self.evidence_log.extend(finished.evidence);
        self.proposals.clear();
        self.known_blocks.clear();
        self.pending_commit = None;
        debug!(target: "consensus", height = self.height, validators = self.validators.len(), "entering height");
        self.enter_propose().await
    }

    async fn enter_propose(&mut self) -> Result<(), ConsensusError> {
        self.step = Step::Propose;
        let proposer = select_proposer(
            &self.validators,
            &self.last_commit_hash,
            self.height,
            self.round,
        );
        self.schedule_timeout(Step::Propose, self.timeouts.proposal());

        let Some(proposer) = proposer else {
            warn!(target: "consensus", height = self.height, "validator set is empty; stalling");
            return Ok(());
        };
        debug!(
            target: "consensus",
            height = self.height,
            round = self.round,
            proposer = %proposer,
            "entering propose"
        );

        if proposer == self.key.address() {
            match self.node.create_block(None).await {
                Ok(block) => {
                    let mut proposal = Proposal {
                        height: self.height,
                        round: self.round,
                        block,
                        proposer,
                        signature: TxSignature::empty(),
                    };
                    proposal.signature = self.key.sign(&proposal.sign_bytes());
                    info!(
                        target: "consensus",
                        height = self.height,
                        round = self.round,
                        "proposing block"
                    );
                    self.outbound
                        .broadcast(wire::PROPOSAL, &to_bytes_canonical(&proposal));
                    return Box::pin(self.on_proposal(proposal)).await;
                }
                Err(e) => {
                    // Not fatal: the round nil-votes through on timeout.
                    warn!(target: "consensus", height = self.height, error = %e, "block creation failed");
                }
            }
        }
        Ok(())
    }

    async fn on_proposal(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        if proposal.height != self.height {
            debug!(
                target: "consensus",
                got = proposal.height,
                at = self.height,
                "proposal for another height; dropped"
            );
            return Ok(());
        }
        let expected = select_proposer(
            &self.validators,
            &self.last_commit_hash,
            proposal.height,
            proposal.round,
        );
        if expected != Some(proposal.proposer) {
            warn!(
                target: "consensus",
                height = proposal.height,
                round = proposal.round,
                got = %proposal.proposer,
                "proposal from unexpected proposer; dropped"
            );
            return Ok(());
        }
        match recover_address(&proposal.sign_bytes(), &proposal.signature) {
            Ok(signer) if signer == proposal.proposer => {}
            _ => {
                warn!(target: "consensus", "proposal signature invalid; dropped");
                return Ok(());
            }
        }
        if proposal.block.header.height != proposal.height {
            warn!(target: "consensus", "proposal block height mismatch; dropped");
            return Ok(());
        }

        let block_hash = proposal.block.hash();
        self.known_blocks.insert(block_hash, proposal.block.clone());
        self.proposals.insert(proposal.round, proposal);

        if self.pending_commit == Some(block_hash) {
            return self.try_commit(block_hash).await;
        }
        if self.step == Step::Propose && self.proposals.contains_key(&self.round) {
            return self.enter_prevote().await;
        }
        Ok(())
    }

    async fn enter_prevote(&mut self) -> Result<(), ConsensusError> {
        self.step = Step::Prevote;
        let target = match self.proposals.get(&self.round) {
            Some(proposal) => {
                let hash = proposal.block.hash();
                let acceptable = match self.locked {
                    None => true,
                    Some((locked_hash, locked_round)) => {
                        locked_hash == hash
                            || (locked_round < self.round
                                && self.valid.map(|(h, _)| h == hash).unwrap_or(false))
                    }
                };
                if acceptable {
                    hash
                } else {
                    NIL_HASH
                }
            }
            None => NIL_HASH,
        };
        self.schedule_timeout(Step::Prevote, self.timeouts.prevote());
        self.cast_vote(VoteStep::Prevote, target).await
    }

    async fn enter_precommit(&mut self, target: Hash) -> Result<(), ConsensusError> {
        self.step = Step::Precommit;
        self.schedule_timeout(Step::Precommit, self.timeouts.precommit());
        self.cast_vote(VoteStep::Precommit, target).await
    }

    async fn cast_vote(&mut self, step: VoteStep, block_hash: Hash) -> Result<(), ConsensusError> {
        let mut vote = Vote {
            height: self.height,
            round: self.round,
            step,
            block_hash,
            validator: self.key.address(),
            signature: TxSignature::empty(),
        };
        vote.signature = self.key.sign(&vote.sign_bytes());
        debug!(
            target: "consensus",
            height = self.height,
            round = self.round,
            step = ?step,
            nil = vote.is_nil(),
            "casting vote"
        );
        self.outbound.broadcast(wire::VOTE, &to_bytes_canonical(&vote));
        // Our own vote runs through the same accounting as everyone else's.
        Box::pin(self.on_vote(vote)).await
    }

    async fn on_vote(&mut self, vote: Vote) -> Result<(), ConsensusError> {
        if vote.height != self.height {
            return Ok(());
        }
        if !self.validators.contains(&vote.validator) {
            debug!(target: "consensus", from = %vote.validator, "vote from non-validator; dropped");
            return Ok(());
        }
        if verify_vote_signature(&vote).is_err() {
            warn!(target: "consensus", from = %vote.validator, "vote signature invalid; dropped");
            return Ok(());
        }

        let round = vote.round;
        let step = vote.step;
        match self.votes.add(vote) {
            AddVote::Added => {}
            AddVote::Duplicate => return Ok(()),
            AddVote::Conflict(evidence) => {
                warn!(
                    target: "consensus",
                    validator = %evidence.first.validator,
                    height = self.height,
                    round,
                    "conflicting votes recorded as evidence"
                );
                return Ok(());
            }
        }
        self.check_progress(round, step).await
    }

    async fn check_progress(&mut self, round: u64, step: VoteStep) -> Result<(), ConsensusError> {
        // A non-nil precommit quorum in any round of this height commits.
        if self.step != Step::Commit {
            if let Some(hash) = self.votes.any_precommit_quorum(&self.validators) {
                return self.try_commit(hash).await;
            }
        }

        match step {
            VoteStep::Prevote if round == self.round && self.step == Step::Prevote => {
                let quorum = self
                    .votes
                    .prevotes(round)
                    .and_then(|set| set.quorum_block(&self.validators));
                if let Some(hash) = quorum {
                    if hash != NIL_HASH {
                        self.locked = Some((hash, round));
                        self.valid = Some((hash, round));
                    }
                    return self.enter_precommit(hash).await;
                }
            }
            VoteStep::Precommit if round == self.round && self.step == Step::Precommit => {
                let quorum = self
                    .votes
                    .precommits(round)
                    .and_then(|set| set.quorum_block(&self.validators));
                if quorum == Some(NIL_HASH) {
                    return self.advance_round().await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn try_commit(&mut self, block_hash: Hash) -> Result<(), ConsensusError> {
        let Some(block) = self.known_blocks.get(&block_hash).cloned() else {
            // Quorum on a block we have not seen yet; commit as soon as the
            // proposal arrives.
            self.pending_commit = Some(block_hash);
            debug!(
                target: "consensus",
                height = self.height,
                hash = %hex::encode(block_hash),
                "precommit quorum for unknown block; waiting for proposal"
            );
            return Ok(());
        };

        self.step = Step::Commit;
        self.pending_commit = None;
        info!(
            target: "consensus",
            height = self.height,
            hash = %hex::encode(block_hash),
            txs = block.transactions.len(),
            "committing block"
        );
        match self.node.commit_block(block).await {
            Ok(_) => {
                self.schedule_timeout(Step::Commit, self.timeouts.commit());
                Ok(())
            }
            Err(e) => Err(ConsensusError::Fatal(format!(
                "commit at height {} failed: {e}",
                self.height
            ))),
        }
    }

    async fn advance_round(&mut self) -> Result<(), ConsensusError> {
        self.round += 1;
        debug!(target: "consensus", height = self.height, round = self.round, "advancing round");
        self.enter_propose().await
    }

    async fn on_timeout(&mut self, height: u64, round: u64, step: Step) -> Result<(), ConsensusError> {
        if height != self.height {
            return Ok(());
        }
        if step == Step::Commit {
            if self.step == Step::Commit {
                return self.enter_new_height().await;
            }
            return Ok(());
        }
        if round != self.round || step != self.step {
            // A timer from a step we already left.
            return Ok(());
        }
        debug!(target: "consensus", height, round, step = ?step, "step timed out");
        match step {
            Step::Propose => self.enter_prevote().await,
            Step::Prevote => self.enter_precommit(NIL_HASH).await,
            Step::Precommit => self.advance_round().await,
            Step::Commit => Ok(()),
        }
    }

    fn schedule_timeout(&self, step: Step, duration: Duration) {
        let tx = self.self_tx.clone();
        let token = EngineInput::Timeout {
            height: self.height,
            round: self.round,
            step,
        };
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(token).await;
        });
    }
}
