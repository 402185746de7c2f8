use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Width in bytes of every [`Address`].
pub const ADDRESS_LEN: usize = 32;

/// Content address of a chunk.
///
/// An `Address` is the BLAKE3 digest of a chunk's full serialized bytes,
/// type tag included. Identical bytes always produce the same address, so the
/// address doubles as the storage key and lets any reader verify what it got.
///
/// Addresses order bytewise. The all-zero address is reserved as "empty" and
/// is never the address of a stored chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// Hash raw chunk bytes into their address.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap an already computed digest.
    pub const fn from_hash(hash: [u8; ADDRESS_LEN]) -> Self {
        Self(hash)
    }

    /// The empty address (all zeros).
    pub const fn empty() -> Self {
        Self([0u8; ADDRESS_LEN])
    }

    /// Returns `true` for the all-zero address.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Read an address from the first [`ADDRESS_LEN`] bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; ADDRESS_LEN] = bytes
            .get(..ADDRESS_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or(TypeError::InvalidLength {
                expected: ADDRESS_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for logs.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(TypeError::InvalidLength {
                expected: ADDRESS_LEN,
                actual: bytes.len(),
            });
        }
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<Address> for [u8; ADDRESS_LEN] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn of_is_deterministic() {
        assert_eq!(Address::of(b"chunk"), Address::of(b"chunk"));
        assert_ne!(Address::of(b"chunk"), Address::of(b"chunk2"));
    }

    #[test]
    fn empty_is_all_zeros() {
        let empty = Address::empty();
        assert!(empty.is_empty());
        assert!(!Address::of(b"").is_empty());
    }

    #[test]
    fn short_hex_is_prefix_of_display() {
        let addr = Address::of(b"x");
        let full = format!("{addr}");
        assert_eq!(full.len(), 64);
        assert!(full.starts_with(&addr.short_hex()));
        assert_eq!(format!("{addr:?}"), format!("Address({})", addr.short_hex()));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            Address::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
        assert_eq!(
            Address::from_hex("abcd"),
            Err(TypeError::InvalidLength {
                expected: 32,
                actual: 2
            })
        );
    }

    #[test]
    fn from_slice_needs_full_width() {
        let err = Address::from_slice(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, TypeError::InvalidLength { actual: 3, .. }));
        let bytes = [7u8; 40];
        assert_eq!(Address::from_slice(&bytes).unwrap(), Address::from_hash([7; 32]));
    }

    #[test]
    fn serde_json_roundtrip() {
        let addr = Address::of(b"serde");
        let json = serde_json::to_string(&addr).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    proptest! {
        #[test]
        fn hex_parse_inverts_display(bytes in any::<[u8; 32]>()) {
            let addr = Address::from_hash(bytes);
            prop_assert_eq!(addr.to_string().parse::<Address>().unwrap(), addr);
        }

        #[test]
        fn ordering_matches_bytes(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assert_eq!(Address::from_hash(a).cmp(&Address::from_hash(b)), a.cmp(&b));
        }
    }
}
