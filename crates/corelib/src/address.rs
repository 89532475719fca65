//! Node addresses and the XOR distance metric.
//!
//! An address is a stable 160-bit node identifier derived from the node's
//! public key, independent of where the node lives on the network. Routing
//! buckets are chosen by the number of leading zero bits in the XOR of two
//! addresses.

use std::fmt;

use crate::crypto::{self, PublicKey};
use crate::error::{Error, Result};

/// Length of an address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Number of bits in an address; also the number of routing buckets.
pub const ADDRESS_BITS: usize = ADDRESS_LEN * 8;

/// Compact identifier for a node in the overlay.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address, used on the wire as "no specific target".
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Derive the address of a public key: the last 20 bytes of its digest.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let hash = crypto::digest(key.as_bytes());
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&hash[hash.len() - ADDRESS_LEN..]);
        Address(out)
    }

    /// Build an address from a wire field, checking its width.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| Error::FieldWidth {
            field: "address",
            expected: ADDRESS_LEN,
            actual: bytes.len(),
        })?;
        Ok(Address(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LEN]
    }

    /// XOR distance between two addresses.
    pub fn distance(&self, other: &Address) -> [u8; ADDRESS_LEN] {
        let mut out = [0u8; ADDRESS_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Bucket of `other` relative to `self`.
    ///
    /// Returns the number of leading zero bits of `self XOR other` read as a
    /// 160-bit big-endian integer: bucket 0 holds addresses that differ in the
    /// most significant bit, bucket 159 those differing only in the least
    /// significant bit. There is no bucket for `self`, so `None` is returned
    /// when the addresses are equal.
    pub fn bucket_index(&self, other: &Address) -> Option<usize> {
        let dist = self.distance(other);
        dist.iter()
            .enumerate()
            .find(|(_, byte)| **byte != 0)
            .map(|(byte_idx, byte)| byte_idx * 8 + byte.leading_zeros() as usize)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Address(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_bit(bit: usize) -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[bit / 8] = 0x80 >> (bit % 8);
        Address(bytes)
    }

    #[test]
    fn test_bucket_index_most_significant_bit() {
        assert_eq!(Address::ZERO.bucket_index(&with_bit(0)), Some(0));
    }

    #[test]
    fn test_bucket_index_least_significant_bit() {
        assert_eq!(Address::ZERO.bucket_index(&with_bit(159)), Some(159));
    }

    #[test]
    fn test_bucket_index_every_bit() {
        for bit in 0..ADDRESS_BITS {
            assert_eq!(Address::ZERO.bucket_index(&with_bit(bit)), Some(bit));
        }
    }

    #[test]
    fn test_bucket_index_self_has_no_bucket() {
        let addr = with_bit(42);
        assert_eq!(addr.bucket_index(&addr), None);
    }

    #[test]
    fn test_from_slice_rejects_wrong_width() {
        assert!(Address::from_slice(&[0u8; 19]).is_err());
        assert!(Address::from_slice(&[0u8; 21]).is_err());
        assert_eq!(Address::from_slice(&[7u8; 20]).unwrap(), Address([7u8; 20]));
    }

    #[test]
    fn test_display_is_hex() {
        let addr = Address([0xab; ADDRESS_LEN]);
        assert_eq!(addr.to_string(), "ab".repeat(ADDRESS_LEN));
    }
}
