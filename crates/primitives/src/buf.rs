use std::{fmt, str::FromStr};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when constructing a [`Buf32`] from foreign input.
#[derive(Debug, Clone, Error)]
pub enum BufError {
    /// Input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Input decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

/// A fixed 32-byte buffer.
///
/// Used for block hashes, transaction ids, contract addresses and storage
/// pointers/values. Ordering is lexicographic over the raw bytes, which is
/// load-bearing for deterministic tiebreaks.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Buf32([u8; 32]);

impl Buf32 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Parses from big-endian hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, BufError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).map_err(|e| BufError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| BufError::WrongLength(raw.len()))?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Buf32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Buf32> for [u8; 32] {
    fn from(buf: Buf32) -> Self {
        buf.0
    }
}

impl AsRef<[u8]> for Buf32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, enough to tell values apart in logs.
        let h = hex::encode(self.0);
        write!(f, "{}..{}", &h[..8], &h[56..])
    }
}

impl FromStr for Buf32 {
    type Err = BufError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Buf32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Buf32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        Buf32::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(feature = "arbitrary")]
impl<'a> arbitrary::Arbitrary<'a> for Buf32 {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        Ok(Self(u.arbitrary()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let buf = Buf32::new([0xab; 32]);
        let s = buf.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(Buf32::from_hex(&s).unwrap(), buf);
        assert_eq!(Buf32::from_hex(&format!("0x{s}")).unwrap(), buf);
    }

    #[test]
    fn test_reject_wrong_length() {
        let err = Buf32::from_hex("abcd").unwrap_err();
        assert!(matches!(err, BufError::WrongLength(2)));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut lo = [0u8; 32];
        let mut hi = [0u8; 32];
        lo[0] = 1;
        hi[0] = 2;
        assert!(Buf32::new(lo) < Buf32::new(hi));
    }
}
