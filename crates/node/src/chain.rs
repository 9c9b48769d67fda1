//! The node façade.
//!
//! Owns the chain head, the mempool, the validator set and the runtime
//! policy, and implements the consensus-API contract for the engine, the
//! gRPC server and the peer-stream supervisor. All writes serialise behind
//! one lock; collection getters return deep copies.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parity_scale_codec::{Decode, Encode};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use nhb_api::chain::{CommitOutcome, ConsensusApi, NodeStatus, SimulationResult, SubmitOutcome};
use nhb_api::storage::KvStore;
use nhb_consensus::{EngineHandle, EngineInput};
use nhb_state::{PolicySnapshot, StateProcessor};
use nhb_types::address::Address;
use nhb_types::block::{Block, BlockHeader};
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::config::NodeConfig;
use nhb_types::consensus::{wire, Proposal, ValidatorSet, Vote};
use nhb_types::envelope::{canonicalize_intent_ref, SignedEnvelope};
use nhb_types::error::{BlockError, NodeError, TxError};
use nhb_types::genesis::Genesis;
use nhb_types::keys::{account_key, block_key, CHAIN_HEAD_KEY, VALIDATOR_SET_KEY};
use nhb_types::tx::Transaction;
use nhb_types::Hash;

use crate::mempool::Mempool;

/// Upper bound on transactions drained into one block proposal.
const MAX_BLOCK_TXS: usize = 1_024;

/// Size of the intent replay window per node.
const REPLAY_WINDOW: usize = 8_192;

/// Persisted chain head pointer.
#[derive(Clone, Debug, Encode, Decode)]
struct ChainHead {
    height: u64,
    hash: Hash,
    timestamp: i64,
    total_transactions: u64,
}

struct NodeInner {
    processor: StateProcessor,
    mempool: Mempool,
    validators: ValidatorSet,
    head: ChainHead,
    replay_window: LruCache<(Address, String), ()>,
}

/// The façade. Shared as `Arc<Node>`; cheap deep-copy reads, serialised
/// writes.
pub struct Node {
    inner: Mutex<NodeInner>,
    store: Arc<dyn KvStore>,
    engine: OnceCell<EngineHandle>,
    validator_address: Address,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Node {
    /// Opens the node over `store`, bootstrapping from `genesis` when the
    /// store is empty.
    pub fn open(
        store: Arc<dyn KvStore>,
        config: &NodeConfig,
        genesis: &Genesis,
        validator_address: Address,
    ) -> Result<Self, NodeError> {
        if genesis.chain_id != config.chain_id {
            return Err(NodeError::InvalidArgument(format!(
                "genesis chain id {} does not match configured {}",
                genesis.chain_id, config.chain_id
            )));
        }

        let mut policy = PolicySnapshot::from_config(config);
        for (token, cap) in &genesis.emission_caps {
            policy
                .emission_caps
                .entry(token.clone())
                .or_insert_with(|| cap.clone());
        }
        let processor = StateProcessor::new(Arc::clone(&store), policy);

        let (head, validators) = match store.get(CHAIN_HEAD_KEY)? {
            Some(bytes) => {
                let head: ChainHead = from_bytes_canonical(&bytes)
                    .map_err(|e| NodeError::Internal(format!("corrupt chain head: {e}")))?;
                let validators = match store.get(VALIDATOR_SET_KEY)? {
                    Some(bytes) => from_bytes_canonical(&bytes)
                        .map_err(|e| NodeError::Internal(format!("corrupt validator set: {e}")))?,
                    None => ValidatorSet::new(),
                };
                info!(
                    target: "node",
                    height = head.height,
                    validators = validators.len(),
                    "resuming from persisted head"
                );
                (head, validators)
            }
            None => {
                genesis
                    .validate()
                    .map_err(|e| NodeError::InvalidArgument(e.to_string()))?;
                let (state_root, validators) = processor.apply_genesis(genesis)?;
                let genesis_block = Block {
                    header: BlockHeader {
                        height: 0,
                        timestamp: genesis.timestamp,
                        prev_hash: [0u8; 32],
                        state_root,
                        tx_root: Block::compute_tx_root(&[]),
                        validator: Address::ZERO,
                    },
                    transactions: vec![],
                };
                let head = ChainHead {
                    height: 0,
                    hash: genesis_block.hash(),
                    timestamp: genesis.timestamp,
                    total_transactions: 0,
                };
                store.apply_batch(&[
                    (block_key(0), Some(to_bytes_canonical(&genesis_block))),
                    (CHAIN_HEAD_KEY.to_vec(), Some(to_bytes_canonical(&head))),
                ])?;
                info!(
                    target: "node",
                    validators = validators.len(),
                    "initialised chain from genesis"
                );
                (head, validators)
            }
        };

        let replay_capacity = NonZeroUsize::new(REPLAY_WINDOW)
            .unwrap_or(NonZeroUsize::MIN);
        Ok(Node {
            inner: Mutex::new(NodeInner {
                processor,
                mempool: Mempool::new(config.mempool.clone()),
                validators,
                head,
                replay_window: LruCache::new(replay_capacity),
            }),
            store,
            engine: OnceCell::new(),
            validator_address,
        })
    }

    /// Wires the engine mailbox after engine construction.
    pub fn set_engine(&self, handle: EngineHandle) {
        if self.engine.set(handle).is_err() {
            warn!(target: "node", "engine handle set more than once; keeping the first");
        }
    }

    fn committed_nonce(&self, sender: &Address) -> Result<u64, NodeError> {
        match self.store.get(&account_key(sender))? {
            Some(bytes) => {
                let account: nhb_types::account::Account = from_bytes_canonical(&bytes)
                    .map_err(|e| NodeError::Internal(format!("corrupt account: {e}")))?;
                Ok(account.nonce)
            }
            None => Ok(0),
        }
    }

    /// Lightweight admission: chain id, pause switch, signature, replay
    /// window, nonce plausibility. Full validation re-runs inside blocks.
    fn admit_to_mempool(
        &self,
        inner: &mut NodeInner,
        tx: Transaction,
    ) -> Result<SubmitOutcome, NodeError> {
        let policy = inner.processor.policy();
        if tx.header.chain_id != policy.chain_id {
            return Err(TxError::ChainIdMismatch {
                expected: policy.chain_id.to_string(),
                got: tx.header.chain_id.to_string(),
            }
            .into());
        }
        let module = tx.module();
        if policy.pauses.is_paused(module) {
            return Err(TxError::Paused(module).into());
        }
        let sender = nhb_crypto::verify_transaction(&tx)?;

        if !tx.header.intent_ref.is_empty() {
            let raw = String::from_utf8_lossy(&tx.header.intent_ref);
            let canonical = canonicalize_intent_ref(&raw);
            if !canonical.is_empty() {
                let key = (sender, canonical);
                if inner.replay_window.contains(&key) {
                    return Err(TxError::PolicyRejected(
                        "intent reference already used".to_string(),
                    )
                    .into());
                }
                inner.replay_window.put(key, ());
            }
        }

        let committed_nonce = self.committed_nonce(&sender)?;
        let outcome = inner.mempool.add(sender, tx, committed_nonce)?;
        if outcome == SubmitOutcome::Accepted {
            debug!(target: "mempool", sender = %sender, pending = inner.mempool.len(), "transaction admitted");
        }
        Ok(outcome)
    }

    fn build_block(
        &self,
        inner: &mut NodeInner,
        txs: Option<Vec<Transaction>>,
    ) -> Result<Block, NodeError> {
        let candidates = match txs {
            Some(explicit) => explicit,
            None => inner.mempool.select(MAX_BLOCK_TXS),
        };
        let height = inner.head.height + 1;
        let timestamp = unix_now().max(inner.head.timestamp + 1);

        inner.processor.begin_block(height, timestamp);
        let mut applied = Vec::with_capacity(candidates.len());
        for tx in candidates {
            match inner.processor.apply_transaction(&tx) {
                Ok(_) => applied.push(tx),
                Err(e) => {
                    // Invalid pending transactions are simply left out of
                    // the proposal; commit-time pruning cleans them up.
                    debug!(target: "node", error = %e, "transaction excluded from proposal");
                }
            }
        }
        let outcome = inner
            .processor
            .end_block()
            .map_err(NodeError::from)?;

        Ok(Block {
            header: BlockHeader {
                height,
                timestamp,
                prev_hash: inner.head.hash,
                state_root: outcome.state_root,
                tx_root: Block::compute_tx_root(&applied),
                validator: self.validator_address,
            },
            transactions: applied,
        })
    }

    fn commit_inner(
        &self,
        inner: &mut NodeInner,
        block: Block,
    ) -> Result<CommitOutcome, NodeError> {
        let block_hash = block.hash();
        if block_hash == inner.head.hash {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        let expected_height = inner.head.height + 1;
        if block.header.height != expected_height {
            return Err(BlockError::InvalidHeight {
                expected: expected_height,
                got: block.header.height,
            }
            .into());
        }
        if block.header.prev_hash != inner.head.hash {
            return Err(BlockError::MismatchedPrevHash {
                expected: hex::encode(inner.head.hash),
                got: hex::encode(block.header.prev_hash),
            }
            .into());
        }
        let tx_root = Block::compute_tx_root(&block.transactions);
        if tx_root != block.header.tx_root {
            return Err(BlockError::MismatchedTxRoot {
                expected: hex::encode(tx_root),
                got: hex::encode(block.header.tx_root),
            }
            .into());
        }

        // Re-apply every transaction in commit mode.
        inner
            .processor
            .begin_block(block.header.height, block.header.timestamp);
        let mut included: BTreeMap<Address, u64> = BTreeMap::new();
        for tx in &block.transactions {
            let receipt = inner.processor.apply_transaction(tx).map_err(|e| {
                NodeError::Block(BlockError::Invalid(format!(
                    "transaction failed on re-apply: {e}"
                )))
            })?;
            included
                .entry(receipt.sender)
                .and_modify(|n| *n = (*n).max(tx.header.nonce))
                .or_insert(tx.header.nonce);
        }
        let outcome = inner.processor.end_block()?;
        if outcome.state_root != block.header.state_root {
            return Err(BlockError::MismatchedStateRoot {
                expected: hex::encode(outcome.state_root),
                got: hex::encode(block.header.state_root),
            }
            .into());
        }

        // Fold chain metadata into the same atomic batch.
        let mut batch = outcome.batch;
        let mut validators = inner.validators.clone();
        for (addr, power) in &outcome.effects.validator_changes {
            validators.set_power(*addr, power.clone());
        }
        if validators != inner.validators {
            batch.push((
                VALIDATOR_SET_KEY.to_vec(),
                Some(to_bytes_canonical(&validators)),
            ));
        }
        let head = ChainHead {
            height: block.header.height,
            hash: block_hash,
            timestamp: block.header.timestamp,
            total_transactions: inner.head.total_transactions + block.transactions.len() as u64,
        };
        batch.push((
            block_key(block.header.height),
            Some(to_bytes_canonical(&block)),
        ));
        batch.push((CHAIN_HEAD_KEY.to_vec(), Some(to_bytes_canonical(&head))));
        self.store.apply_batch(&batch)?;

        // Governance effects swap the policy snapshot after persistence.
        if !outcome.effects.param_changes.is_empty() {
            let mut policy = inner.processor.policy().clone();
            for change in &outcome.effects.param_changes {
                if let Err(e) = policy.apply_param_change(change) {
                    warn!(target: "node", key = %change.key, error = %e, "executed parameter change failed to apply");
                }
            }
            inner.processor.set_policy(policy);
        }

        inner.validators = validators;
        inner.head = head;
        inner.mempool.prune_committed(&included);

        info!(
            target: "node",
            height = inner.head.height,
            hash = %hex::encode(block_hash),
            txs = block.transactions.len(),
            "block committed"
        );
        Ok(CommitOutcome::Committed)
    }

    fn namespaced(namespace: &str, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(namespace.len() + 1 + key.len());
        full.extend_from_slice(namespace.as_bytes());
        full.push(b'/');
        full.extend_from_slice(key);
        full
    }
}

#[async_trait]
impl ConsensusApi for Node {
    async fn submit_transaction(&self, tx: Transaction) -> Result<SubmitOutcome, NodeError> {
        let mut inner = self.inner.lock();
        self.admit_to_mempool(&mut inner, tx)
    }

    async fn submit_envelope(&self, envelope: SignedEnvelope) -> Result<SubmitOutcome, NodeError> {
        let submitter = nhb_crypto::verify_envelope(&envelope)?;
        let tx = envelope.decode_transaction()?;

        let mut inner = self.inner.lock();
        let expected_chain = inner.processor.policy().chain_id.to_string();
        if envelope.body.chain_id != expected_chain {
            return Err(TxError::ChainIdMismatch {
                expected: expected_chain,
                got: envelope.body.chain_id.clone(),
            }
            .into());
        }
        // The envelope's intent reference is replay-guarded per submitter.
        let canonical = canonicalize_intent_ref(&envelope.body.intent.intent_ref);
        if !canonical.is_empty() {
            let key = (submitter, canonical);
            if inner.replay_window.contains(&key) {
                return Err(TxError::PolicyRejected(
                    "envelope intent reference already used".to_string(),
                )
                .into());
            }
            inner.replay_window.put(key, ());
        }
        self.admit_to_mempool(&mut inner, tx)
    }

    async fn create_block(&self, txs: Option<Vec<Transaction>>) -> Result<Block, NodeError> {
        let mut inner = self.inner.lock();
        self.build_block(&mut inner, txs)
    }

    async fn commit_block(&self, block: Block) -> Result<CommitOutcome, NodeError> {
        let mut inner = self.inner.lock();
        self.commit_inner(&mut inner, block)
    }

    async fn block_by_height(&self, height: u64) -> Result<Block, NodeError> {
        match self.store.get(&block_key(height))? {
            Some(bytes) => Ok(from_bytes_canonical(&bytes)
                .map_err(|e| NodeError::Internal(format!("corrupt block record: {e}")))?),
            None => Err(NodeError::NotFound(format!("block at height {height}"))),
        }
    }

    async fn height(&self) -> u64 {
        self.inner.lock().head.height
    }

    async fn last_commit_hash(&self) -> Hash {
        self.inner.lock().head.hash
    }

    async fn validator_set(&self) -> ValidatorSet {
        self.inner.lock().validators.clone()
    }

    async fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.inner.lock().mempool.snapshot()
    }

    async fn status(&self) -> NodeStatus {
        let inner = self.inner.lock();
        NodeStatus {
            height: inner.head.height,
            latest_timestamp: inner.head.timestamp,
            total_transactions: inner.head.total_transactions,
        }
    }

    async fn query_state(
        &self,
        namespace: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, NodeError> {
        Ok(self.store.get(&Self::namespaced(namespace, key))?)
    }

    async fn query_prefix(
        &self,
        namespace: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, NodeError> {
        Ok(self.store.scan_prefix(&Self::namespaced(namespace, prefix))?)
    }

    async fn simulate(&self, raw_tx: &[u8]) -> Result<SimulationResult, NodeError> {
        let tx: Transaction = from_bytes_canonical(raw_tx)?;
        let receipt = {
            let inner = self.inner.lock();
            inner.processor.simulate(
                &tx,
                inner.head.height + 1,
                unix_now().max(inner.head.timestamp + 1),
            )?
        };
        Ok(SimulationResult {
            gas_used: receipt.gas_used,
            gas_cost: receipt.gas_cost.to_string(),
            events: receipt
                .events
                .into_iter()
                .map(|e| (e.kind, e.attributes))
                .collect(),
        })
    }

    async fn process_network_message(
        &self,
        msg_type: u16,
        payload: &[u8],
    ) -> Result<(), NodeError> {
        match msg_type {
            wire::PROPOSAL => {
                let proposal: Proposal = from_bytes_canonical(payload)?;
                if let Some(engine) = self.engine.get() {
                    engine
                        .submit(EngineInput::Proposal(Box::new(proposal)))
                        .await;
                }
                Ok(())
            }
            wire::VOTE => {
                let vote: Vote = from_bytes_canonical(payload)?;
                if let Some(engine) = self.engine.get() {
                    engine.submit(EngineInput::Vote(vote)).await;
                }
                Ok(())
            }
            wire::TX => {
                let tx: Transaction = from_bytes_canonical(payload)?;
                self.submit_transaction(tx).await.map(|_| ())
            }
            wire::TX_ENVELOPE => {
                let envelope: SignedEnvelope = from_bytes_canonical(payload)?;
                self.submit_envelope(envelope).await.map(|_| ())
            }
            other => Err(NodeError::InvalidArgument(format!(
                "unknown wire message type {other}"
            ))),
        }
    }
}
