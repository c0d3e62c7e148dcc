//! Algorand account addresses.
//!
//! An address is the base32 (no padding) encoding of the 32-byte ed25519
//! public key followed by the last four bytes of its SHA-512/256 digest.

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512_256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CHECKSUM_LEN: usize = 4;
const ENCODED_LEN: usize = 58;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be {ENCODED_LEN} characters, got {0}")]
    Length(usize),
    #[error("address is not valid base32")]
    Encoding,
    #[error("address checksum mismatch")]
    Checksum,
}

/// A 32-byte Algorand public key, displayed in its checksummed form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self(public_key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Escrow account controlled by an application.
    pub fn for_application(app_id: u64) -> Self {
        let mut hasher = Sha512_256::new();
        hasher.update(b"appID");
        hasher.update(app_id.to_be_bytes());
        Self(hasher.finalize().into())
    }

    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let digest = Sha512_256::digest(self.0);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::with_capacity(32 + CHECKSUM_LEN);
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(&self.checksum());
        f.write_str(&BASE32_NOPAD.encode(&buf))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != ENCODED_LEN {
            return Err(AddressError::Length(s.len()));
        }
        let raw = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| AddressError::Encoding)?;
        if raw.len() != 32 + CHECKSUM_LEN {
            return Err(AddressError::Encoding);
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&raw[..32]);
        let address = Self(key);
        if address.checksum()[..] != raw[32..] {
            return Err(AddressError::Checksum);
        }
        Ok(address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ";

    #[test]
    fn zero_address_encoding() {
        assert_eq!(Address::default().to_string(), ZERO);
        assert_eq!(ZERO.parse::<Address>().unwrap(), Address::default());
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut bad = ZERO.to_string();
        bad.replace_range(57..58, "A");
        assert_eq!(bad.parse::<Address>(), Err(AddressError::Checksum));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!("ABC".parse::<Address>(), Err(AddressError::Length(3)));
    }

    #[test]
    fn parses_what_it_prints() {
        let addr = Address::new([7u8; 32]);
        let text = addr.to_string();
        assert_eq!(text.len(), 58);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn application_escrow_is_stable() {
        let a = Address::for_application(1002541853);
        assert_eq!(a, Address::for_application(1002541853));
        assert_ne!(a, Address::for_application(1002541854));
    }
}
