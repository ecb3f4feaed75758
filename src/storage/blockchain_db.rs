// Blockchain database using sled

use crate::core::{Block, Hash256, Serializable};
use crate::{LedgerError, Result};
use sled::Db;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

/// Reserved key holding the chain tip
const TIP_KEY: &[u8] = b"tip";
/// Reserved key holding the difficulty the chain was created with
const DIFFICULTY_KEY: &[u8] = b"bits";

/// Why a commit transaction gave up
#[derive(Debug)]
enum CommitAbort {
    AlreadyInitialized,
    TipMoved(Option<Hash256>),
}

/// Blockchain database
#[derive(Clone)]
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    /// Open (or create) a database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.db.get(Self::block_key(hash))? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.db.contains_key(Self::block_key(hash))?)
    }

    /// Get the chain tip (hash of the newest block)
    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.db.get(TIP_KEY)? {
            Some(data) => Hash256::from_slice(&data)
                .map(Some)
                .ok_or_else(|| LedgerError::corrupt(format!("invalid tip length: {}", data.len()))),
            None => Ok(None),
        }
    }

    /// Difficulty bits recorded at genesis
    pub fn get_difficulty(&self) -> Result<Option<u32>> {
        match self.db.get(DIFFICULTY_KEY)? {
            Some(data) => {
                let bytes: [u8; 4] = data.as_ref().try_into().map_err(|_| {
                    LedgerError::corrupt(format!("invalid difficulty length: {}", data.len()))
                })?;
                Ok(Some(u32::from_le_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Store the genesis block, the tip and the difficulty in one transaction.
    /// Fails if any tip already exists.
    pub fn commit_genesis(&self, genesis: &Block, bits: u32) -> Result<()> {
        let key = Self::block_key(&genesis.hash);
        let serialized = genesis.serialize();

        let outcome = self.db.transaction(|tree| {
            if tree.get(TIP_KEY)?.is_some() {
                return Err(ConflictableTransactionError::Abort(CommitAbort::AlreadyInitialized));
            }
            tree.insert(key.as_slice(), serialized.as_slice())?;
            tree.insert(TIP_KEY, genesis.hash.as_bytes().as_slice())?;
            tree.insert(DIFFICULTY_KEY, &bits.to_le_bytes()[..])?;
            Ok(())
        });

        self.finish_commit(outcome, &genesis.hash)
    }

    /// Store `block` and advance the tip to it in one transaction.
    /// Aborts if the stored tip is no longer `expected_tip`.
    pub fn commit_block(&self, block: &Block, expected_tip: &Hash256) -> Result<()> {
        let key = Self::block_key(&block.hash);
        let serialized = block.serialize();

        let outcome = self.db.transaction(|tree| {
            let current = tree.get(TIP_KEY)?;
            if current.as_deref() != Some(expected_tip.as_bytes().as_slice()) {
                let actual = current.and_then(|tip| Hash256::from_slice(&tip));
                return Err(ConflictableTransactionError::Abort(CommitAbort::TipMoved(actual)));
            }
            tree.insert(key.as_slice(), serialized.as_slice())?;
            tree.insert(TIP_KEY, block.hash.as_bytes().as_slice())?;
            Ok(())
        });

        self.finish_commit(outcome, expected_tip)
    }

    fn finish_commit(
        &self,
        outcome: std::result::Result<(), TransactionError<CommitAbort>>,
        expected_tip: &Hash256,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.db.flush()?;
                Ok(())
            }
            Err(TransactionError::Abort(CommitAbort::AlreadyInitialized)) => {
                Err(LedgerError::AlreadyInitialized)
            }
            Err(TransactionError::Abort(CommitAbort::TipMoved(actual))) => Err(LedgerError::TipMoved {
                expected: *expected_tip,
                actual: actual.unwrap_or_default(),
            }),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    /// Store `block` under `hash` without touching the tip
    #[cfg(test)]
    pub(crate) fn insert_block_under(&self, hash: &Hash256, block: &Block) -> Result<()> {
        self.db.insert(Self::block_key(hash), block.serialize())?;
        Ok(())
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }
}
