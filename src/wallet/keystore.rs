// Key management

use crate::core::{PubKeyHash, hash160};
use crate::wallet::Address;
use crate::{LedgerError, Result};
use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// P-256 key pair
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    /// Uncompressed point without the SEC1 tag: X || Y
    public_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a new key pair from the OS random source
    pub fn generate() -> Result<Self> {
        loop {
            let mut secret = [0u8; 32];
            OsRng
                .try_fill_bytes(&mut secret)
                .map_err(|e| LedgerError::Crypto(format!("random source unavailable: {}", e)))?;

            // Zero or >= curve order: draw again
            if let Ok(signing_key) = SigningKey::from_slice(&secret) {
                return Ok(Self::from_signing_key(signing_key));
            }
        }
    }

    /// Create from secret scalar bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_signing_key(SigningKey::from_slice(bytes)?))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = raw_public_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Get public key bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Get pubkey hash
    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash160(&self.public_key)
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

fn raw_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes()[1..].to_vec()
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct StoredKey {
    secret_key: String,
}

/// Keystore - manages multiple key pairs
#[derive(Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
}

impl Keystore {
    /// Create a new keystore
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new address
    pub fn new_address(&mut self) -> Result<Address> {
        let keypair = KeyPair::generate()?;
        let address = keypair.address();
        self.keys.insert(address.clone(), keypair);
        log::info!("Created address {}", address);
        Ok(address)
    }

    /// Get key pair for address
    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// Get all addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Count addresses
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored: HashMap<&Address, StoredKey> = self
            .keys
            .iter()
            .map(|(addr, kp)| (addr, StoredKey { secret_key: kp.secret_hex() }))
            .collect();

        let json = serde_json::to_string_pretty(&stored)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let stored: HashMap<Address, StoredKey> = serde_json::from_str(&json)?;

        let mut keys = HashMap::with_capacity(stored.len());
        for (address, key) in stored {
            let secret = hex::decode(&key.secret_key).map_err(LedgerError::corrupt)?;
            let keypair = KeyPair::from_secret_bytes(&secret)?;
            if keypair.address() != address {
                return Err(LedgerError::corrupt(format!(
                    "stored key does not belong to {}",
                    address
                )));
            }
            keys.insert(address, keypair);
        }

        Ok(Self { keys })
    }

    /// Load the keystore at `path`, or start an empty one if the file is absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            log::info!("Loading keystore from {}", path.as_ref().display());
            Self::load(path)
        } else {
            log::info!("Creating new keystore");
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::validate_address;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate().unwrap();

        assert_eq!(kp.public_key().len(), 64); // Raw X || Y
        assert_eq!(kp.pub_key_hash(), hash160(kp.public_key()));
        assert!(validate_address(kp.address().as_str()));
    }

    #[test]
    fn test_secret_round_trip() {
        let kp = KeyPair::generate().unwrap();
        let restored = KeyPair::from_secret_bytes(&kp.signing_key().to_bytes()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());

        assert!(KeyPair::from_secret_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_keystore() {
        let mut ks = Keystore::new();
        assert_eq!(ks.count(), 0);

        let addr1 = ks.new_address().unwrap();
        let addr2 = ks.new_address().unwrap();
        assert_eq!(ks.count(), 2);
        assert_ne!(addr1, addr2);

        assert_eq!(ks.get_keypair(&addr1).unwrap().address(), addr1);
        assert!(ks.get_keypair(&Address::from_pubkey_hash(&[0; 20])).is_none());

        let addresses = ks.list_addresses();
        assert_eq!(addresses.len(), 2);
        assert!(addresses[0] < addresses[1]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let mut ks = Keystore::new();
        let addr = ks.new_address().unwrap();
        ks.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        assert_eq!(loaded.list_addresses(), vec![addr.clone()]);
        assert_eq!(
            loaded.get_keypair(&addr).unwrap().public_key(),
            ks.get_keypair(&addr).unwrap().public_key()
        );

        let empty = Keystore::load_or_default(dir.path().join("missing.json")).unwrap();
        assert_eq!(empty.count(), 0);
    }

    #[test]
    fn test_load_rejects_mismatched_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let kp = KeyPair::generate().unwrap();
        let other = Address::from_pubkey_hash(&[9; 20]);
        let json = format!("{{\"{}\":{{\"secret_key\":\"{}\"}}}}", other, kp.secret_hex());
        fs::write(&path, json).unwrap();

        assert!(matches!(Keystore::load(&path), Err(LedgerError::Corrupt(_))));
    }
}
