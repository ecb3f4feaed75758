// Newest-to-oldest walk over stored blocks

use crate::consensus::{BlockValidator, ProofOfWork};
use crate::core::{Block, Hash256};
use crate::storage::BlockchainDB;
use crate::{LedgerError, Result};
use std::iter::FusedIterator;

/// Walks from a tip snapshot back to genesis.
///
/// Blocks are immutable once stored, so a walk started before a new block is
/// committed keeps seeing the chain as it was. Any error ends the walk.
pub struct LedgerIterator {
    db: BlockchainDB,
    next: Option<Hash256>,
    /// Header checks applied to every block, if set
    validator: Option<BlockValidator>,
}

impl LedgerIterator {
    pub(crate) fn new(db: BlockchainDB, tip: Hash256, pow: Option<ProofOfWork>) -> Self {
        Self {
            db,
            next: Some(tip),
            validator: pow.map(BlockValidator::new),
        }
    }

    fn load(&self, hash: Hash256) -> Result<Block> {
        let block = self.db.get_block(&hash)?.ok_or_else(|| {
            LedgerError::corrupt(format!("block {} is referenced but not stored", hash))
        })?;
        if block.hash != hash {
            return Err(LedgerError::corrupt(format!(
                "block stored under {} claims hash {}",
                hash, block.hash
            )));
        }

        if let Some(validator) = &self.validator {
            validator.validate_header(&block).map_err(|source| {
                log::warn!("Rejecting stored block {}: {}", hash, source);
                LedgerError::InvalidBlock { hash, source }
            })?;
        }
        Ok(block)
    }
}

impl Iterator for LedgerIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.load(hash) {
            Ok(block) => {
                self.next = block.prev_hash;
                Some(Ok(block))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl FusedIterator for LedgerIterator {}
