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
//! Outbound broadcast and the peer-relay stream.
//!
//! The broadcaster decouples the consensus engine from transport
//! connectivity: enqueueing never blocks and never fails, a single writer
//! drains the queue in order, and reconnects are the supervisor's problem.

pub mod broadcaster;
pub mod security;
pub mod supervisor;

pub use broadcaster::{Broadcaster, OutboundMessage};
pub use supervisor::PeerStreamSupervisor;
