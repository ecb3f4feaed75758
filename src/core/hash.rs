// Hashing utilities

use crate::core::{Hash256, PubKeyHash};
use sha2::{Digest, Sha256};

/// Length of the address checksum
pub const CHECKSUM_LEN: usize = 4;

/// Single SHA256 hash, the content hash of headers and transactions
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256::new(Sha256::digest(data).into())
}

/// RIPEMD160(SHA256(data)) - used for address generation and output locks
pub fn hash160(data: &[u8]) -> PubKeyHash {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

/// First four bytes of SHA256(SHA256(payload))
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut result = [0u8; CHECKSUM_LEN];
    result.copy_from_slice(&second[..CHECKSUM_LEN]);
    result
}
