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
//! The node façade and validator daemon for the NHB chain.

pub mod chain;
pub mod mempool;
pub mod rpc;
pub mod telemetry;

pub use chain::Node;
pub use mempool::Mempool;
pub use rpc::RpcContext;
