//! 20-byte chain addresses with bech32 human-readable forms.
//!
//! The chain distinguishes native-asset addresses (`nhb1…`) from
//! wrapped-asset addresses (`znhb1…`) purely by prefix; the underlying
//! 20 bytes are the same keccak-derived identifier.

use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use parity_scale_codec::{Decode, Encode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AddressError;

/// Byte length of an address.
pub const ADDRESS_LEN: usize = 20;

/// Human-readable prefix for native-asset addresses.
pub const HRP_NATIVE: &str = "nhb";

/// Human-readable prefix for wrapped-asset addresses.
pub const HRP_WRAPPED: &str = "znhb";

/// Which asset family an encoded address belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    /// `nhb1…` form.
    Native,
    /// `znhb1…` form.
    Wrapped,
}

/// A 20-byte account identifier.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode,
)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address, used as the nil recipient.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Returns `true` if this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// Encodes with the given human-readable prefix.
    pub fn to_bech32(&self, kind: AddressKind) -> String {
        let hrp = match kind {
            AddressKind::Native => HRP_NATIVE,
            AddressKind::Wrapped => HRP_WRAPPED,
        };
        // Encoding a fixed 20-byte payload with a static HRP cannot fail.
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32)
            .unwrap_or_else(|_| hex::encode(self.0))
    }

    /// Decodes either address form, reporting which prefix was used.
    pub fn from_bech32(s: &str) -> Result<(Self, AddressKind), AddressError> {
        let (hrp, data, _variant) =
            bech32::decode(s).map_err(|e| AddressError::Encoding(e.to_string()))?;
        let kind = match hrp.as_str() {
            HRP_NATIVE => AddressKind::Native,
            HRP_WRAPPED => AddressKind::Wrapped,
            other => return Err(AddressError::UnknownPrefix(other.to_string())),
        };
        let bytes =
            Vec::<u8>::from_base32(&data).map_err(|e| AddressError::Encoding(e.to_string()))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(AddressError::Length(bytes.len()));
        }
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes);
        Ok((Address(out), kind))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(b: [u8; ADDRESS_LEN]) -> Self {
        Address(b)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bech32(AddressKind::Native))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_bech32(s).map(|(addr, _)| addr)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_str(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_roundtrip_both_prefixes() {
        let addr = Address([0x11; ADDRESS_LEN]);

        let native = addr.to_bech32(AddressKind::Native);
        assert!(native.starts_with("nhb1"));
        let (decoded, kind) = Address::from_bech32(&native).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(kind, AddressKind::Native);

        let wrapped = addr.to_bech32(AddressKind::Wrapped);
        assert!(wrapped.starts_with("znhb1"));
        let (decoded, kind) = Address::from_bech32(&wrapped).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(kind, AddressKind::Wrapped);
    }

    #[test]
    fn unknown_prefix_rejected() {
        let addr = Address([0x22; ADDRESS_LEN]);
        let encoded = bech32::encode("cosmos", addr.0.to_base32(), Variant::Bech32).unwrap();
        assert!(matches!(
            Address::from_bech32(&encoded),
            Err(AddressError::UnknownPrefix(_))
        ));
    }
}
