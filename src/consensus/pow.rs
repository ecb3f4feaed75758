// Proof of Work implementation

use crate::core::{Block, Hash256, sha256};
use crate::{LedgerError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Reference difficulty: hashes need 24 leading zero bits
pub const DEFAULT_DIFFICULTY_BITS: u32 = 24;

/// Nonces tried between two looks at the cancellation flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Cloneable flag that stops a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every search holding a clone of this token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Difficulty target: a valid hash is below 1 << (256 - bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub bits: u32,
}

impl Target {
    pub fn from_bits(bits: u32) -> Result<Self> {
        if !(1..=255).contains(&bits) {
            return Err(LedgerError::Config(format!(
                "difficulty bits must be within 1..=255, got {}",
                bits
            )));
        }
        Ok(Self { bits })
    }

    /// The target as a big-endian 256-bit integer
    pub fn to_hash256(&self) -> Hash256 {
        let shift = (256 - self.bits) as usize;
        let mut target = [0u8; 32];
        target[31 - shift / 8] = 1 << (shift % 8);
        Hash256::new(target)
    }

    /// Check if a hash meets this target (hash < target)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        // Byte arrays compare lexicographically, which is big-endian order
        hash.as_bytes() < self.to_hash256().as_bytes()
    }
}

/// Proof of Work engine
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    target: Target,
    /// Cached target hash for fast comparison
    target_hash: Hash256,
}

impl ProofOfWork {
    pub fn new(bits: u32) -> Result<Self> {
        let target = Target::from_bits(bits)?;
        Ok(Self {
            target,
            target_hash: target.to_hash256(),
        })
    }

    pub fn bits(&self) -> u32 {
        self.target.bits
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// prev hash || transactions digest || timestamp || bits || nonce,
    /// integers as 8-byte big-endian
    pub fn prepare_header(&self, block: &Block, nonce: u64) -> Vec<u8> {
        let mut data = self.header_prefix(block);
        data.extend_from_slice(&nonce.to_be_bytes());
        data
    }

    /// Hash of the header for a given nonce
    pub fn header_hash(&self, block: &Block, nonce: u64) -> Hash256 {
        sha256(&self.prepare_header(block, nonce))
    }

    /// Search nonces 0, 1, 2, ... until the header hash is below the target.
    ///
    /// Returns `None` if `cancel` fires first.
    pub fn run(&self, block: &Block, cancel: &CancelToken) -> Option<MiningResult> {
        let start_time = Instant::now();
        let prefix = self.header_prefix(block);
        let mut data = Vec::with_capacity(prefix.len() + 8);

        for nonce in 0..=u64::MAX {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                log::warn!("Mining cancelled after {} attempts", nonce);
                return None;
            }

            data.clear();
            data.extend_from_slice(&prefix);
            data.extend_from_slice(&nonce.to_be_bytes());
            let hash = sha256(&data);

            if self.is_valid_hash_fast(&hash) {
                return Some(MiningResult {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                    duration: start_time.elapsed(),
                });
            }

            // Progress indicator every 100k attempts
            if nonce > 0 && nonce % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    nonce,
                    nonce as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        None
    }

    /// Recompute the hash from the stored nonce and check it against the target
    pub fn validate(&self, block: &Block) -> bool {
        let hash = self.header_hash(block, block.nonce);
        self.is_valid_hash_fast(&hash)
    }

    #[inline]
    fn is_valid_hash_fast(&self, hash: &Hash256) -> bool {
        hash.as_bytes() < self.target_hash.as_bytes()
    }

    fn header_prefix(&self, block: &Block) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
        if let Some(prev) = &block.prev_hash {
            data.extend_from_slice(prev.as_bytes());
        }
        data.extend_from_slice(block.hash_transactions().as_bytes());
        data.extend_from_slice(&block.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.target.bits as i64).to_be_bytes());
        data
    }
}

/// Mining result
#[derive(Debug, Clone)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u64,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}
