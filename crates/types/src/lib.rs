#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Core data structures and error types for the NHB validator core.
//!
//! Everything consensus-critical lives here: addresses, amounts, accounts,
//! transactions, blocks, the validator set, vote types, the signed
//! transaction envelope, state-key namespaces and the canonical codec.
//! Higher crates depend on this one and never the other way around.

pub mod account;
pub mod address;
pub mod amount;
pub mod block;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod envelope;
pub mod error;
pub mod genesis;
pub mod hashing;
pub mod keys;
pub mod tx;

pub use account::Account;
pub use address::{Address, AddressKind};
pub use amount::Amount;
pub use block::{Block, BlockHeader};
pub use consensus::{Proposal, ValidatorSet, Vote, VoteEvidence, VoteStep, NIL_HASH};
pub use tx::{Module, Transaction, TxHeader, TxPayload, TxSignature, TxType};

/// A 32-byte hash digest.
pub type Hash = [u8; 32];
