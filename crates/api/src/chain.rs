//! The consensus-API contract exposed by the node façade.

use async_trait::async_trait;

use nhb_types::block::Block;
use nhb_types::consensus::ValidatorSet;
use nhb_types::envelope::SignedEnvelope;
use nhb_types::error::NodeError;
use nhb_types::tx::Transaction;
use nhb_types::Hash;

/// Result of a mempool submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted into the mempool.
    Accepted,
    /// The (sender, nonce) pair was already included in a committed block;
    /// re-submission is a no-op.
    AlreadyIncluded,
}

/// Result of a block commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The chain head advanced to this block.
    Committed,
    /// The block is already the chain head; commit is idempotent.
    AlreadyCommitted,
}

/// Gas and event outcome of a dry-run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationResult {
    /// Gas the transaction would consume.
    pub gas_used: u64,
    /// Total gas cost, `gas_used * gas_price`, decimal encoded.
    pub gas_cost: String,
    /// Events the transaction would emit: (kind, attributes).
    pub events: Vec<(String, Vec<(String, String)>)>,
}

/// Liveness snapshot for the status RPC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    /// Current chain head height.
    pub height: u64,
    /// Timestamp of the head block, unix seconds.
    pub latest_timestamp: i64,
    /// Total transactions committed since genesis.
    pub total_transactions: u64,
}

/// The contract consumed by the BFT engine, the gRPC server and the
/// peer-stream supervisor.
///
/// Implementations serialise all writes behind one lock; collection getters
/// return deep copies so callers iterate without holding it.
#[async_trait]
pub trait ConsensusApi: Send + Sync {
    /// Admits a transaction into the mempool after lightweight checks.
    async fn submit_transaction(&self, tx: Transaction) -> Result<SubmitOutcome, NodeError>;

    /// Verifies an envelope's outer signature, decodes the inner payload and
    /// submits the resulting transaction.
    async fn submit_envelope(&self, envelope: SignedEnvelope) -> Result<SubmitOutcome, NodeError>;

    /// Builds a candidate block from the given transactions, or drains the
    /// mempool when `None`. Dry-runs the state processor; commits nothing.
    async fn create_block(&self, txs: Option<Vec<Transaction>>) -> Result<Block, NodeError>;

    /// Verifies linkage, re-applies the block, advances the chain head and
    /// prunes included transactions from the mempool.
    async fn commit_block(&self, block: Block) -> Result<CommitOutcome, NodeError>;

    /// The block at a height.
    async fn block_by_height(&self, height: u64) -> Result<Block, NodeError>;

    /// Current chain head height.
    async fn height(&self) -> u64;

    /// Hash of the last committed block.
    async fn last_commit_hash(&self) -> Hash;

    /// Deep copy of the current validator set.
    async fn validator_set(&self) -> ValidatorSet;

    /// Deep copy of the pending transactions, in selection order.
    async fn mempool_snapshot(&self) -> Vec<Transaction>;

    /// Liveness snapshot.
    async fn status(&self) -> NodeStatus;

    /// Reads one key in a namespace.
    async fn query_state(&self, namespace: &str, key: &[u8])
        -> Result<Option<Vec<u8>>, NodeError>;

    /// Reads all pairs under a prefix in a namespace, in key order.
    async fn query_prefix(
        &self,
        namespace: &str,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, NodeError>;

    /// Dry-runs a canonical transaction against the head state.
    async fn simulate(&self, raw_tx: &[u8]) -> Result<SimulationResult, NodeError>;

    /// Entry point for peer-originated envelopes, demultiplexed by wire type
    /// into engine callbacks or mempool submission.
    async fn process_network_message(&self, msg_type: u16, payload: &[u8])
        -> Result<(), NodeError>;
}
