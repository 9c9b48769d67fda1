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
//! gRPC surface of the NHB validator core.
//!
//! Generated tonic services for the consensus and query APIs and the peer
//! relay stream, plus the request authentication chain shared by every
//! handler.

pub mod auth;

/// Consensus control-plane API.
pub mod consensus {
    pub mod v1 {
        tonic::include_proto!("nhb.consensus.v1");
    }
    pub use v1::*;
}

/// State query API.
pub mod query {
    pub mod v1 {
        tonic::include_proto!("nhb.query.v1");
    }
    pub use v1::*;
}

/// Peer relay stream.
pub mod relay {
    pub mod v1 {
        tonic::include_proto!("nhb.relay.v1");
    }
    pub use v1::*;
}
