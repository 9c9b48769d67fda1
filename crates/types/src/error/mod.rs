//! Core error taxonomy for the NHB validator core.

use thiserror::Error;

use crate::address::Address;
use crate::tx::Module;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised by the canonical codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Canonical decoding failed (malformed, truncated or trailing bytes).
    #[error("canonical decode failed: {0}")]
    Decode(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "CODEC_DECODE_FAILED",
        }
    }
}

/// Errors related to bech32 address handling.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The decoded payload was not exactly 20 bytes.
    #[error("address payload must be 20 bytes, got {0}")]
    Length(usize),
    /// The bech32 string could not be decoded.
    #[error("bech32 decode failed: {0}")]
    Encoding(String),
    /// The human-readable prefix is not one of the chain's prefixes.
    #[error("unknown address prefix: {0}")]
    UnknownPrefix(String),
}

impl ErrorCode for AddressError {
    fn code(&self) -> &'static str {
        match self {
            Self::Length(_) => "ADDR_INVALID_LENGTH",
            Self::Encoding(_) => "ADDR_ENCODING",
            Self::UnknownPrefix(_) => "ADDR_UNKNOWN_PREFIX",
        }
    }
}

/// Errors related to the state tree or the key-value backend.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested key was not found in the state.
    #[error("key not found in state")]
    KeyNotFound,
    /// An error occurred in the storage backend.
    #[error("state backend error: {0}")]
    Backend(String),
    /// An error occurred while writing to the state.
    #[error("state write error: {0}")]
    WriteError(String),
    /// A stored value failed to decode.
    #[error("state decode error: {0}")]
    Decode(String),
    /// The provided value was invalid.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::KeyNotFound => "STATE_KEY_NOT_FOUND",
            Self::Backend(_) => "STATE_BACKEND_ERROR",
            Self::WriteError(_) => "STATE_WRITE_ERROR",
            Self::Decode(_) => "STATE_DECODE_ERROR",
            Self::InvalidValue(_) => "STATE_INVALID_VALUE",
        }
    }
}

impl From<CodecError> for StateError {
    fn from(e: CodecError) -> Self {
        StateError::Decode(e.to_string())
    }
}

/// Errors raised while admitting or applying a transaction.
#[derive(Debug, Error)]
pub enum TxError {
    /// The signature failed cryptographic verification or recovery.
    #[error("invalid transaction signature")]
    InvalidSignature,
    /// The transaction nonce does not match the account's next nonce.
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch {
        /// The next nonce recorded for the account.
        expected: u64,
        /// The nonce carried by the transaction.
        got: u64,
    },
    /// The transaction was built for a different chain.
    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainIdMismatch {
        /// This chain's id, decimal encoded.
        expected: String,
        /// The transaction's chain id, decimal encoded.
        got: String,
    },
    /// The payload could not be decoded or fails structural validation.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// The type tag does not map to a known transaction variant.
    #[error("unknown transaction type: {0}")]
    UnknownType(u32),
    /// The mint voucher expired before the block timestamp.
    #[error("voucher expired at {expiry}, block time is {now}")]
    ExpiredVoucher {
        /// Voucher expiry, unix seconds.
        expiry: i64,
        /// Block timestamp, unix seconds.
        now: i64,
    },
    /// The mint invoice has already been consumed.
    #[error("invoice already consumed: {0}")]
    InvoiceConsumed(String),
    /// An amount was structurally invalid for the operation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// The account balance cannot cover the transfer plus gas.
    #[error("insufficient balance")]
    InsufficientBalance,
    /// The transaction's module is paused.
    #[error("module paused: {0}")]
    Paused(Module),
    /// A per-address quota was exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Minting would push the token over its annual emission cap.
    #[error("emission cap exceeded for token {token}")]
    EmissionCapExceeded {
        /// The token whose cap would be breached.
        token: String,
    },
    /// A paymaster daily cap or sponsorship rule was violated.
    #[error("paymaster over limit: {0}")]
    PaymasterOverLimit(String),
    /// The transaction violates a configured policy.
    #[error("rejected by policy: {0}")]
    PolicyRejected(String),
    /// The signer lacks a required role.
    #[error("missing role: {0}")]
    RoleMissing(String),
    /// A module-specific rule rejected the transaction.
    #[error("{module} module error: {reason}")]
    ModuleError {
        /// The module that rejected the transaction.
        module: Module,
        /// The module's reason.
        reason: String,
    },
    /// An error occurred while reading or writing state.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ErrorCode for TxError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "TX_INVALID_SIGNATURE",
            Self::NonceMismatch { .. } => "TX_NONCE_MISMATCH",
            Self::ChainIdMismatch { .. } => "TX_CHAIN_ID_MISMATCH",
            Self::MalformedPayload(_) => "TX_MALFORMED_PAYLOAD",
            Self::UnknownType(_) => "TX_UNKNOWN_TYPE",
            Self::ExpiredVoucher { .. } => "TX_EXPIRED_VOUCHER",
            Self::InvoiceConsumed(_) => "TX_INVOICE_CONSUMED",
            Self::InvalidAmount(_) => "TX_INVALID_AMOUNT",
            Self::InsufficientBalance => "TX_INSUFFICIENT_BALANCE",
            Self::Paused(_) => "TX_MODULE_PAUSED",
            Self::QuotaExceeded(_) => "TX_QUOTA_EXCEEDED",
            Self::EmissionCapExceeded { .. } => "TX_EMISSION_CAP_EXCEEDED",
            Self::PaymasterOverLimit(_) => "TX_PAYMASTER_OVER_LIMIT",
            Self::PolicyRejected(_) => "TX_POLICY_REJECTED",
            Self::RoleMissing(_) => "TX_ROLE_MISSING",
            Self::ModuleError { .. } => "TX_MODULE_ERROR",
            Self::State(_) => "TX_STATE_ERROR",
        }
    }
}

impl From<CodecError> for TxError {
    fn from(e: CodecError) -> Self {
        TxError::MalformedPayload(e.to_string())
    }
}

/// Errors related to block linkage and verification.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The block's height is not head + 1.
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight {
        /// The expected block height.
        expected: u64,
        /// The height of the received block.
        got: u64,
    },
    /// The block's `prev_hash` does not match the chain head.
    #[error("mismatched previous block hash: expected {expected}, got {got}")]
    MismatchedPrevHash {
        /// The expected hash of the previous block, hex encoded.
        expected: String,
        /// The `prev_hash` from the received block, hex encoded.
        got: String,
    },
    /// The state root after re-application differs from the header.
    #[error("mismatched state root: expected {expected}, got {got}")]
    MismatchedStateRoot {
        /// The computed post-application root, hex encoded.
        expected: String,
        /// The state root from the received block, hex encoded.
        got: String,
    },
    /// The transaction root does not cover the block's transaction list.
    #[error("mismatched transaction root: expected {expected}, got {got}")]
    MismatchedTxRoot {
        /// The computed transaction root, hex encoded.
        expected: String,
        /// The tx root from the received block, hex encoded.
        got: String,
    },
    /// A generic, unspecified block validation error.
    #[error("invalid block: {0}")]
    Invalid(String),
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidHeight { .. } => "BLOCK_INVALID_HEIGHT",
            Self::MismatchedPrevHash { .. } => "BLOCK_MISMATCHED_PREV_HASH",
            Self::MismatchedStateRoot { .. } => "BLOCK_MISMATCHED_STATE_ROOT",
            Self::MismatchedTxRoot { .. } => "BLOCK_MISMATCHED_TX_ROOT",
            Self::Invalid(_) => "BLOCK_INVALID",
        }
    }
}

/// Errors related to the BFT round engine.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The proposer of a block was not the expected one for the round.
    #[error("invalid proposer: expected {expected}, got {got}")]
    InvalidProposer {
        /// The address selected by the deterministic rule.
        expected: Address,
        /// The address that actually signed the proposal.
        got: Address,
    },
    /// A proposed block failed verification.
    #[error("block verification failed: {0}")]
    BlockVerificationFailed(String),
    /// A signature in a consensus message was invalid.
    #[error("invalid signature in consensus message")]
    InvalidSignature,
    /// An error occurred while accessing state.
    #[error("state access error: {0}")]
    State(#[from] StateError),
    /// Commit-time state divergence. The engine halts.
    #[error("fatal consensus error: {0}")]
    Fatal(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidProposer { .. } => "CONSENSUS_INVALID_PROPOSER",
            Self::BlockVerificationFailed(_) => "CONSENSUS_BLOCK_VERIFICATION_FAILED",
            Self::InvalidSignature => "CONSENSUS_INVALID_SIGNATURE",
            Self::State(_) => "CONSENSUS_STATE_ACCESS_ERROR",
            Self::Fatal(_) => "CONSENSUS_FATAL",
        }
    }
}

/// Errors local to the broadcaster and peer-stream supervisor.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Dialling the peer relay failed.
    #[error("dial failed: {0}")]
    Dial(String),
    /// The relay stream terminated.
    #[error("stream closed: {0}")]
    StreamClosed(String),
    /// No transport client is currently attached.
    #[error("no relay client attached")]
    NoClient,
    /// A plaintext dial was refused by the security policy.
    #[error("insecure transport refused: {0}")]
    InsecureRefused(String),
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Dial(_) => "RELAY_DIAL_FAILED",
            Self::StreamClosed(_) => "RELAY_STREAM_CLOSED",
            Self::NoClient => "RELAY_NO_CLIENT",
            Self::InsecureRefused(_) => "RELAY_INSECURE_REFUSED",
        }
    }
}

/// Errors surfaced by the node façade to its callers.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A transaction failed admission or application.
    #[error("transaction error: {0}")]
    Tx(#[from] TxError),
    /// A block failed linkage or verification.
    #[error("block error: {0}")]
    Block(#[from] BlockError),
    /// A state read or write failed.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The mempool has reached its configured capacity.
    #[error("mempool full")]
    MempoolFull,
    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for NodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Tx(e) => e.code(),
            Self::Block(e) => e.code(),
            Self::State(e) => e.code(),
            Self::NotFound(_) => "NODE_NOT_FOUND",
            Self::MempoolFull => "NODE_MEMPOOL_FULL",
            Self::InvalidArgument(_) => "NODE_INVALID_ARGUMENT",
            Self::Internal(_) => "NODE_INTERNAL",
        }
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        NodeError::InvalidArgument(e.to_string())
    }
}

/// Errors that abort startup before the node accepts traffic.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A consensus timeout was zero or negative.
    #[error("invalid timeout for {0}: must be strictly positive")]
    InvalidTimeout(&'static str),
    /// Neither a shared secret nor a client CN allow-list is configured.
    #[error("no authentication mechanism configured")]
    MissingAuthenticator,
    /// TLS is required but no certificate material was provided.
    #[error("TLS material missing: {0}")]
    MissingTlsMaterial(String),
    /// A plaintext listener or dial was requested outside the loopback carve-out.
    #[error("insecure transport refused: {0}")]
    InsecureRefused(String),
    /// No genesis file and autogenesis was not explicitly allowed.
    #[error("genesis file missing and autogenesis not allowed")]
    MissingGenesis,
    /// The validator key source is unusable.
    #[error("invalid key source: {0}")]
    InvalidKeySource(String),
    /// A generic configuration error.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTimeout(_) => "CONFIG_INVALID_TIMEOUT",
            Self::MissingAuthenticator => "CONFIG_MISSING_AUTHENTICATOR",
            Self::MissingTlsMaterial(_) => "CONFIG_MISSING_TLS_MATERIAL",
            Self::InsecureRefused(_) => "CONFIG_INSECURE_REFUSED",
            Self::MissingGenesis => "CONFIG_MISSING_GENESIS",
            Self::InvalidKeySource(_) => "CONFIG_INVALID_KEY_SOURCE",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}
