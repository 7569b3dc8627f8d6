use std::fmt;
use std::str::FromStr;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ADDRESS_LEN: usize = 20;

/// 20-byte account identifier, rendered as `0x` followed by 40 hex digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AddressError {
    #[error("invalid address hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("address must be 20 bytes, got {0}")]
    Length(usize),
}

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the account address of a verifying key: the trailing 20 bytes
    /// of its SHA-256 digest.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha256::digest(public_key);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let raw = hex::decode(digits)?;
        let bytes: [u8; ADDRESS_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Length(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_prefix() {
        let text = "0x00112233445566778899aabbccddeeff00112233";
        let with: Address = text.parse().unwrap();
        let without: Address = text[2..].parse().unwrap();
        assert_eq!(with, without);
        assert_eq!(with.to_string(), text);
    }

    #[test]
    fn rejects_wrong_length_and_bad_hex() {
        assert_eq!(
            "0xdeadbeef".parse::<Address>().unwrap_err(),
            AddressError::Length(4)
        );
        assert!(matches!(
            "0xzz112233445566778899aabbccddeeff00112233".parse::<Address>(),
            Err(AddressError::Hex(_))
        ));
    }

    #[test]
    fn public_key_derivation_is_deterministic() {
        let a = Address::from_public_key(&[7u8; 32]);
        let b = Address::from_public_key(&[7u8; 32]);
        let c = Address::from_public_key(&[8u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let addr = Address::from_bytes([0xab; ADDRESS_LEN]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
