//! Signing, recovery and verification.

use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey, Signature};

use nhb_types::address::Address;
use nhb_types::envelope::SignedEnvelope;
use nhb_types::error::{ConfigError, TxError};
use nhb_types::hashing::keccak256;
use nhb_types::tx::{Transaction, TxSignature};

/// A validator's secp256k1 signing identity.
#[derive(Clone)]
pub struct ValidatorKey {
    secret: SecretKey,
    address: Address,
}

impl std::fmt::Debug for ValidatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret never appears in logs.
        write!(f, "ValidatorKey({})", self.address)
    }
}

impl ValidatorKey {
    /// Builds a key from 32 raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, ConfigError> {
        let secret = SecretKey::parse(bytes)
            .map_err(|e| ConfigError::InvalidKeySource(format!("bad secret scalar: {e}")))?;
        let address = derive_address(&PublicKey::from_secret_key(&secret));
        Ok(ValidatorKey { secret, address })
    }

    /// Builds a key from a hex-encoded secret.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, ConfigError> {
        let raw = hex::decode(hex_str.trim().trim_start_matches("0x"))
            .map_err(|e| ConfigError::InvalidKeySource(format!("bad secret hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| ConfigError::InvalidKeySource("secret must be 32 bytes".to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Generates a fresh random key, for tests and autogenesis bootstraps.
    pub fn random() -> Self {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let address = derive_address(&PublicKey::from_secret_key(&secret));
        ValidatorKey { secret, address }
    }

    /// The address this key signs as.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs arbitrary bytes; the payload is keccak-hashed first.
    pub fn sign(&self, payload: &[u8]) -> TxSignature {
        sign_recoverable(&self.secret, payload)
    }

    /// Uncompressed SEC1 public key bytes.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        PublicKey::from_secret_key(&self.secret)
            .serialize()
            .to_vec()
    }
}

/// The last 20 bytes of keccak over the uncompressed public key body.
pub fn derive_address(public: &PublicKey) -> Address {
    let serialized = public.serialize();
    // Skip the 0x04 SEC1 tag byte.
    let (_, body) = serialized.split_at(1);
    let digest = keccak256(body);
    let (_, tail) = digest.split_at(12);
    let mut out = [0u8; 20];
    out.copy_from_slice(tail);
    Address(out)
}

/// Signs `keccak256(payload)` recoverably.
pub fn sign_recoverable(secret: &SecretKey, payload: &[u8]) -> TxSignature {
    let digest = keccak256(payload);
    let message = Message::parse(&digest);
    let (signature, recovery_id) = libsecp256k1::sign(&message, secret);
    let serialized = signature.serialize();
    let (r_half, s_half) = serialized.split_at(32);
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(r_half);
    s.copy_from_slice(s_half);
    TxSignature {
        r,
        s,
        v: recovery_id.serialize(),
    }
}

/// Recovers the signing address of `sig` over `keccak256(payload)`.
pub fn recover_address(payload: &[u8], sig: &TxSignature) -> Result<Address, TxError> {
    let digest = keccak256(payload);
    let message = Message::parse(&digest);
    let mut compact = [0u8; 64];
    {
        let (r_half, s_half) = compact.split_at_mut(32);
        r_half.copy_from_slice(&sig.r);
        s_half.copy_from_slice(&sig.s);
    }
    let signature =
        Signature::parse_standard(&compact).map_err(|_| TxError::InvalidSignature)?;
    let recovery_id = RecoveryId::parse(sig.v).map_err(|_| TxError::InvalidSignature)?;
    let public = libsecp256k1::recover(&message, &signature, &recovery_id)
        .map_err(|_| TxError::InvalidSignature)?;
    Ok(derive_address(&public))
}

/// Recovers the signer from a detached 65-byte `r ∥ s ∥ v` signature, the
/// form vouchers and envelopes carry.
pub fn recover_address_bytes(payload: &[u8], sig65: &[u8]) -> Result<Address, TxError> {
    if sig65.len() != 65 {
        return Err(TxError::InvalidSignature);
    }
    let (rs, v_byte) = sig65.split_at(64);
    let (r_half, s_half) = rs.split_at(32);
    let v = *v_byte.first().ok_or(TxError::InvalidSignature)?;
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(r_half);
    s.copy_from_slice(s_half);
    recover_address(payload, &TxSignature { r, s, v })
}

/// Serialises a signature back to the detached 65-byte form.
pub fn signature_to_bytes(sig: &TxSignature) -> Vec<u8> {
    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&sig.r);
    out.extend_from_slice(&sig.s);
    out.push(sig.v);
    out
}

/// Verifies a transaction's sender signature and returns the sender.
pub fn verify_transaction(tx: &Transaction) -> Result<Address, TxError> {
    recover_address(&tx.sign_bytes(), &tx.signature)
}

/// Verifies a vote signature against the voting validator's address.
pub fn verify_vote_signature(vote: &nhb_types::consensus::Vote) -> Result<(), TxError> {
    let recovered = recover_address(&vote.sign_bytes(), &vote.signature)?;
    if recovered != vote.validator {
        return Err(TxError::InvalidSignature);
    }
    Ok(())
}

/// Verifies an envelope's outer signature and returns the submitter address.
///
/// The signature must both verify against the declared public key and
/// recover to the same key; a mismatch means the envelope was spliced.
pub fn verify_envelope(envelope: &SignedEnvelope) -> Result<Address, TxError> {
    let declared = PublicKey::parse_slice(&envelope.signature.public_key, None)
        .map_err(|_| TxError::InvalidSignature)?;
    let recovered_addr =
        recover_address_bytes(&envelope.body.sign_bytes(), &envelope.signature.signature)?;
    let declared_addr = derive_address(&declared);
    if recovered_addr != declared_addr {
        return Err(TxError::InvalidSignature);
    }
    Ok(declared_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhb_types::amount::Amount;
    use nhb_types::envelope::{AnyPayload, EnvelopeBody, EnvelopeSignature, IntentMeta, TX_TYPE_URL};
    use nhb_types::tx::{TxHeader, TxPayload};

    fn sample_tx(key: &ValidatorKey, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            header: TxHeader {
                chain_id: Amount::from(187001u64),
                nonce,
                to: Address([0x55; 20]),
                value: Amount::from(12u64),
                data: vec![],
                gas_limit: 21_000,
                gas_price: Amount::from(1u64),
                paymaster: None,
                intent_ref: vec![],
                intent_expiry: 0,
                merchant_addr: String::new(),
                device_id: String::new(),
                refund_of: String::new(),
            },
            payload: TxPayload::Transfer,
            signature: TxSignature::empty(),
            paymaster_signature: None,
        };
        tx.signature = key.sign(&tx.sign_bytes());
        tx
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let key = ValidatorKey::random();
        let tx = sample_tx(&key, 3);
        assert_eq!(verify_transaction(&tx).unwrap(), key.address());
    }

    #[test]
    fn tampered_payload_changes_recovered_address() {
        let key = ValidatorKey::random();
        let mut tx = sample_tx(&key, 3);
        tx.header.value = Amount::from(13u64);
        // Recovery either fails or yields a different address; both reject.
        match verify_transaction(&tx) {
            Ok(addr) => assert_ne!(addr, key.address()),
            Err(TxError::InvalidSignature) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn envelope_splice_detected() {
        let submitter = ValidatorKey::random();
        let imposter = ValidatorKey::random();
        let inner = sample_tx(&submitter, 0);
        let body = EnvelopeBody {
            chain_id: "187001".to_string(),
            nonce: 0,
            payload: AnyPayload {
                type_url: TX_TYPE_URL.to_string(),
                value: nhb_types::codec::to_bytes_canonical(&inner),
            },
            intent: IntentMeta::default(),
        };
        let signature = submitter.sign(&body.sign_bytes());
        let envelope = SignedEnvelope {
            body,
            signature: EnvelopeSignature {
                // Declared key does not match the actual signer.
                public_key: imposter.public_key_bytes(),
                signature: signature_to_bytes(&signature),
            },
        };
        assert!(matches!(
            verify_envelope(&envelope),
            Err(TxError::InvalidSignature)
        ));
    }

    #[test]
    fn keystore_hex_roundtrip() {
        let key = ValidatorKey::random();
        // Serialize through the 65-byte detached form and back.
        let sig = key.sign(b"hello");
        let detached = signature_to_bytes(&sig);
        assert_eq!(
            recover_address_bytes(b"hello", &detached).unwrap(),
            key.address()
        );
    }
}
