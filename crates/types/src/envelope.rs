//! The signed transaction envelope.
//!
//! External submitters wrap a canonical transaction in an envelope whose
//! outer signature covers the canonical encoding of the body. The inner
//! payload travels as a type-URL-tagged blob so the envelope shape never
//! changes when transaction variants are added.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::codec::{from_bytes_canonical, to_bytes_canonical};
use crate::error::TxError;
use crate::tx::Transaction;

/// Type URL identifying a canonical [`Transaction`] payload.
pub const TX_TYPE_URL: &str = "type.nhbchain.io/nhb.tx.v1.Transaction";

/// A type-URL-tagged opaque payload.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct AnyPayload {
    /// Identifies how `value` decodes.
    pub type_url: String,
    /// Canonical encoding of the inner message.
    pub value: Vec<u8>,
}

/// Client intent metadata carried alongside the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct IntentMeta {
    /// Client-chosen intent reference; replay-guarded after canonicalisation.
    pub intent_ref: String,
    /// Intent expiry, unix seconds; zero when unused.
    pub intent_expiry: i64,
    /// Merchant identifier.
    pub merchant_addr: String,
    /// Device identifier.
    pub device_id: String,
    /// Reference to a refunded transaction. Surfaced, not enforced.
    pub refund_of: String,
}

/// The signed portion of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct EnvelopeBody {
    /// Chain id as a decimal string.
    pub chain_id: String,
    /// Envelope nonce; zero or equal to the decoded transaction's nonce.
    pub nonce: u64,
    /// The wrapped transaction.
    pub payload: AnyPayload,
    /// Intent metadata.
    pub intent: IntentMeta,
}

impl EnvelopeBody {
    /// The bytes the submitter signs.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(b"nhb/envelope/v1".as_slice(), self))
    }
}

/// The outer signature: an uncompressed public key plus a 65-byte
/// recoverable signature over the body.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// SEC1 public key bytes of the submitter.
    pub public_key: Vec<u8>,
    /// 65-byte r ∥ s ∥ v recoverable signature.
    pub signature: Vec<u8>,
}

/// A complete signed envelope.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Signed body.
    pub body: EnvelopeBody,
    /// Outer signature.
    pub signature: EnvelopeSignature,
}

impl SignedEnvelope {
    /// Decodes the inner payload into a core transaction.
    ///
    /// Checks the type URL and the envelope-nonce rule (zero or equal to the
    /// transaction's nonce); signature verification is the caller's job.
    pub fn decode_transaction(&self) -> Result<Transaction, TxError> {
        if self.body.payload.type_url != TX_TYPE_URL {
            return Err(TxError::MalformedPayload(format!(
                "unknown payload type url: {}",
                self.body.payload.type_url
            )));
        }
        let tx: Transaction = from_bytes_canonical(&self.body.payload.value)?;
        if self.body.nonce != 0 && self.body.nonce != tx.header.nonce {
            return Err(TxError::MalformedPayload(format!(
                "envelope nonce {} disagrees with transaction nonce {}",
                self.body.nonce, tx.header.nonce
            )));
        }
        Ok(tx)
    }
}

/// Canonicalises an intent reference for the replay window.
///
/// Strips surrounding whitespace and zero-width characters, lower-cases, and
/// drops a leading `0x`. Two references that differ only in these
/// presentational details are the same reference.
pub fn canonicalize_intent_ref(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect();
    let trimmed = cleaned.trim();
    let lowered = trimmed.to_lowercase();
    lowered
        .strip_prefix("0x")
        .map(str::to_string)
        .unwrap_or(lowered)
}
