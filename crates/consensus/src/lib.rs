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
//! The BFT round engine.
//!
//! One height at a time, one task, one mailbox: proposals, votes and timer
//! expiries are serialised through a single channel so every state
//! transition happens on one thread. Quorum is weighted by validator power;
//! proposer selection is deterministic from the prior commit hash.

pub mod engine;
pub mod proposer;
pub mod votes;

pub use engine::{BftEngine, EngineHandle, EngineInput, Step};
pub use proposer::select_proposer;
pub use votes::{AddVote, HeightVotes, VoteSet};
