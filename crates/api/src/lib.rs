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
//! Trait seams between the validator core components.
//!
//! The BFT engine, the gRPC server and the peer-stream supervisor all talk
//! to the node through [`chain::ConsensusApi`]; the state processor talks to
//! storage through [`storage::KvStore`] and [`storage::StateAccess`]. Keeping
//! the contracts here breaks every would-be dependency cycle.

pub mod chain;
pub mod relay;
pub mod storage;

pub use chain::{CommitOutcome, ConsensusApi, NodeStatus, SimulationResult, SubmitOutcome};
pub use relay::{OutboundSink, RelayClient};
pub use storage::{KvStore, StateAccess};
