//! Hashing primitives: SHA-256, double SHA-256, and the 32-byte digest type.
//!
//! Transaction IDs and block header hashes are both double SHA-256 over the
//! canonical serialization of the object (with its own hash omitted, which
//! the canonical encoding never includes in the first place).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte hash value.
///
/// Used for transaction IDs, block header hashes, and merkle roots.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase prevouts and the
    /// genesis block's previous-hash field.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a 64-character lowercase or uppercase hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256: `sha256(sha256(data))`.
pub fn dsha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn nonzero_is_not_zero() {
        assert!(!Hash256([1; 32]).is_zero());
    }

    #[test]
    fn display_is_lowercase_hex() {
        let h = Hash256([0xAB; 32]);
        let s = format!("{h}");
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn from_hex_round_trip() {
        let h = Hash256([0x5C; 32]);
        assert_eq!(Hash256::from_hex(&h.to_string()), Some(h));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert_eq!(Hash256::from_hex("zz"), None);
        assert_eq!(Hash256::from_hex(&"ab".repeat(31)), None);
    }

    #[test]
    fn dsha256_is_double_sha256() {
        let inner = sha256(b"pebble");
        assert_eq!(dsha256(b"pebble"), Hash256(sha256(&inner)));
    }

    #[test]
    fn dsha256_known_vector() {
        // dSHA256("hello") — standard test vector.
        let h = dsha256(b"hello");
        assert_eq!(
            h.to_string(),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn dsha256_deterministic() {
        assert_eq!(dsha256(b"x"), dsha256(b"x"));
        assert_ne!(dsha256(b"x"), dsha256(b"y"));
    }
}
