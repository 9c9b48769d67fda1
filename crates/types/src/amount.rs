//! Arbitrary-precision non-negative amounts.
//!
//! `Amount` is the single numeric type used for balances, stakes, voting
//! power and emission accounting. It serializes as a decimal string at every
//! external surface and as a canonical big-endian magnitude in SCALE; zero is
//! the empty magnitude, and leading zero bytes are rejected on decode so a
//! given value has exactly one wire form.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use num_bigint::BigUint;
use parity_scale_codec::{Decode, Encode, Error as ScaleError, Input, Output};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// An arbitrary-precision non-negative integer amount.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    /// The canonical zero amount.
    pub fn zero() -> Self {
        Amount(BigUint::default())
    }

    /// Returns `true` if this amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    /// Builds an amount from canonical big-endian magnitude bytes.
    ///
    /// An empty slice is zero. Leading zero bytes are rejected.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.first() == Some(&0) {
            return Err("non-canonical amount: leading zero byte".to_string());
        }
        Ok(Amount(BigUint::from_bytes_be(bytes)))
    }

    /// Returns the canonical big-endian magnitude; empty for zero.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        if self.is_zero() {
            Vec::new()
        } else {
            self.0.to_bytes_be()
        }
    }

    /// Checked subtraction; `None` when `other` exceeds `self`.
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if other.0 > self.0 {
            None
        } else {
            Some(Amount(&self.0 - &other.0))
        }
    }

    /// Addition. `BigUint` addition cannot overflow.
    pub fn checked_add(&self, other: &Amount) -> Amount {
        Amount(&self.0 + &other.0)
    }

    /// Multiplication by another amount.
    pub fn checked_mul(&self, other: &Amount) -> Amount {
        Amount(&self.0 * &other.0)
    }

    /// Multiplication by a machine word, used for gas arithmetic.
    pub fn mul_u64(&self, factor: u64) -> Amount {
        Amount(&self.0 * factor)
    }

    /// Scales by `bps / 10_000`, truncating.
    pub fn mul_bps(&self, bps: u64) -> Amount {
        Amount((&self.0 * bps) / 10_000u32)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Amount(BigUint::from(v))
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Amount(BigUint::from(v))
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty amount string".to_string());
        }
        BigUint::from_str(trimmed)
            .map(Amount)
            .map_err(|e| format!("invalid decimal amount {trimmed:?}: {e}"))
    }
}

impl Encode for Amount {
    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        self.to_be_bytes().encode_to(dest);
    }
}

impl Decode for Amount {
    fn decode<I: Input>(input: &mut I) -> Result<Self, ScaleError> {
        let bytes = Vec::<u8>::decode(input)?;
        Amount::from_be_bytes(&bytes).map_err(|_| "non-canonical amount encoding".into())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::from_str(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_bytes_canonical, to_bytes_canonical};

    #[test]
    fn zero_is_empty_magnitude() {
        assert!(Amount::zero().to_be_bytes().is_empty());
        let encoded = to_bytes_canonical(&Amount::zero());
        let decoded: Amount = from_bytes_canonical(&encoded).unwrap();
        assert!(decoded.is_zero());
    }

    #[test]
    fn leading_zero_rejected() {
        // Vec<u8> SCALE prefix for one byte, then a zero byte.
        let encoded = to_bytes_canonical(&vec![0u8]);
        assert!(from_bytes_canonical::<Amount>(&encoded).is_err());
    }

    #[test]
    fn decimal_roundtrip() {
        let a: Amount = "340282366920938463463374607431768211456".parse().unwrap();
        assert_eq!(a.to_string(), "340282366920938463463374607431768211456");
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211456\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn ordering_and_sub() {
        let a = Amount::from(1_000u64);
        let b = Amount::from(400u64);
        assert!(b < a);
        assert_eq!(a.checked_sub(&b), Some(Amount::from(600u64)));
        assert_eq!(b.checked_sub(&a), None);
    }
}
