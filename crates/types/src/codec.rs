//! The canonical, deterministic binary codec for all consensus-critical data.
//!
//! Thin wrappers around `parity-scale-codec` (SCALE). Centralizing the codec
//! here guarantees every component serializes state, signing payloads and
//! wire messages identically; a divergent binary representation of the same
//! value is a consensus failure.

use parity_scale_codec::{Decode, DecodeAll, Encode};

use crate::error::CodecError;

/// Encodes a value into its canonical byte representation.
///
/// Use this for everything that is hashed, signed, persisted to state or put
/// on the wire.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from its canonical byte representation.
///
/// Fails fast on malformed input and rejects trailing bytes, so a payload
/// that is not exactly one canonical value never enters a consensus path.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, CodecError> {
    T::decode_all(&mut &*b).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Encode, Decode, Debug, PartialEq, Eq)]
    struct Sample {
        id: u32,
        name: String,
        tags: Vec<u8>,
    }

    #[test]
    fn roundtrip() {
        let original = Sample {
            id: 42,
            name: "proposal".to_string(),
            tags: vec![1, 2, 3],
        };
        let encoded = to_bytes_canonical(&original);
        assert!(!encoded.is_empty());
        let decoded = from_bytes_canonical::<Sample>(&encoded).unwrap();
        assert_eq!(original, decoded);

        let mut map = BTreeMap::new();
        map.insert([1u8; 20], 7u64);
        map.insert([2u8; 20], 9u64);
        let decoded: BTreeMap<[u8; 20], u64> =
            from_bytes_canonical(&to_bytes_canonical(&map)).unwrap();
        assert_eq!(map, decoded);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = to_bytes_canonical(&7u32);
        encoded.push(0xff);
        assert!(from_bytes_canonical::<u32>(&encoded).is_err());
    }

    #[test]
    fn truncation_rejected() {
        let mut encoded = to_bytes_canonical(&Sample {
            id: 99,
            name: "another".to_string(),
            tags: vec![10, 20, 30],
        });
        encoded.pop();
        encoded.pop();
        assert!(from_bytes_canonical::<Sample>(&encoded).is_err());
    }
}
