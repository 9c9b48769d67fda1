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
//! Recoverable secp256k1 signatures and address derivation.
//!
//! Every signing surface in the core goes through the same scheme: the
//! payload's canonical encoding is keccak-hashed, the 32-byte digest is
//! signed recoverably, and verification recovers the signer's address
//! instead of carrying a public key. Addresses are the last 20 bytes of
//! keccak over the uncompressed public key body.

pub mod sign;

pub use sign::{
    derive_address, recover_address, recover_address_bytes, sign_recoverable, signature_to_bytes,
    verify_envelope, verify_transaction, verify_vote_signature, ValidatorKey,
};
