// Base58Check addresses

use crate::core::{CHECKSUM_LEN, PubKeyHash, checksum, hash160};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address version byte
pub const VERSION: u8 = 0x00;

/// Ledger address: base58(version || pubkey hash || checksum)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Derive the address of a raw public key
    pub fn from_public_key(pub_key: &[u8]) -> Self {
        Self::from_pubkey_hash(&hash160(pub_key))
    }

    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &PubKeyHash) -> Self {
        let mut payload = Vec::with_capacity(1 + hash.len() + CHECKSUM_LEN);
        payload.push(VERSION);
        payload.extend_from_slice(hash);
        let sum = checksum(&payload);
        payload.extend_from_slice(&sum);
        Self(bs58::encode(payload).into_string())
    }

    /// Validate and wrap an address string
    pub fn parse(address: &str) -> Result<Self> {
        if !validate_address(address) {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }
        let address = Self(address.to_string());
        address.pub_key_hash()?;
        Ok(address)
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Strip version byte and checksum. Only meaningful for validated addresses.
    pub fn pub_key_hash(&self) -> Result<PubKeyHash> {
        let invalid = || LedgerError::InvalidAddress(self.0.clone());
        let decoded = bs58::decode(&self.0).into_vec().map_err(|_| invalid())?;
        if decoded.len() < 1 + CHECKSUM_LEN {
            return Err(invalid());
        }
        decoded[1..decoded.len() - CHECKSUM_LEN]
            .try_into()
            .map_err(|_| invalid())
    }
}

/// Check the trailing checksum of a base58 address.
/// Any decode failure counts as invalid.
pub fn validate_address(address: &str) -> bool {
    let Ok(decoded) = bs58::decode(address).into_vec() else {
        return false;
    };
    if decoded.len() <= CHECKSUM_LEN {
        return false;
    }

    let (versioned, claimed) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    checksum(versioned) == claimed
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
