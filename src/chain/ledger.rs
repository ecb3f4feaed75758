// Ledger: the chain of mined blocks and the operations over it

use crate::chain::{LedgerIterator, UtxoResolver};
use crate::consensus::{BlockValidator, CancelToken, ProofOfWork, ValidationError};
use crate::core::{
    Block, GENESIS_COINBASE_DATA, Hash256, OutPoint, PrevTransactions, Transaction,
};
use crate::storage::BlockchainDB;
use crate::wallet::{Address, new_coinbase};
use crate::{LedgerError, Result};
use p256::ecdsa::SigningKey;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a ledger. Clones share the store and the tip.
#[derive(Clone)]
pub struct Ledger {
    db: BlockchainDB,
    tip: Arc<RwLock<Hash256>>,
    pow: ProofOfWork,
}

impl Ledger {
    /// Mine a genesis block paying the subsidy to `genesis_address` and
    /// store it. Fails with `AlreadyInitialized` if the store has a tip.
    pub fn create(db: BlockchainDB, genesis_address: &Address, bits: u32) -> Result<Self> {
        if db.get_tip()?.is_some() {
            return Err(LedgerError::AlreadyInitialized);
        }
        let pow = ProofOfWork::new(bits)?;

        let coinbase = new_coinbase(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = mine(&pow, Block::new(vec![coinbase], None), &CancelToken::new())?;
        db.commit_genesis(&genesis, bits)?;
        log::info!("Created ledger with genesis block {}", genesis.hash);

        Ok(Self {
            db,
            tip: Arc::new(RwLock::new(genesis.hash)),
            pow,
        })
    }

    /// Open an existing ledger
    pub fn open(db: BlockchainDB) -> Result<Self> {
        let tip = db.get_tip()?.ok_or(LedgerError::NotInitialized)?;
        let bits = db
            .get_difficulty()?
            .ok_or_else(|| LedgerError::corrupt("ledger has a tip but no difficulty"))?;
        let pow = ProofOfWork::new(bits).map_err(LedgerError::corrupt)?;
        log::debug!("Opened ledger at tip {} ({} bits)", tip, bits);

        Ok(Self {
            db,
            tip: Arc::new(RwLock::new(tip)),
            pow,
        })
    }

    /// Hash of the newest block
    pub fn tip(&self) -> Hash256 {
        *self.tip.read()
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.pow.bits()
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn validator(&self) -> BlockValidator {
        BlockValidator::new(self.pow)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        self.db.get_block(hash)
    }

    /// Validate `transactions`, mine a block holding them on top of the tip
    /// and commit it.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        self.mine_block_with(transactions, &CancelToken::new())
    }

    /// Like [`Ledger::mine_block`], giving up with `MiningCancelled` once
    /// `cancel` fires. A cancelled or failed attempt leaves the store as it was.
    pub fn mine_block_with(
        &self,
        transactions: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<Block> {
        self.mine_on(self.tip(), transactions, cancel)
    }

    /// Validate against the chain ending at `tip`, mine on `tip` and commit
    /// only while `tip` is still the stored tip. A sibling handle committing
    /// in between makes this fail with `TipMoved`.
    fn mine_on(
        &self,
        tip: Hash256,
        transactions: Vec<Transaction>,
        cancel: &CancelToken,
    ) -> Result<Block> {
        BlockValidator::validate_body(&transactions)?;
        self.check_against_chain(&transactions, tip)?;

        let block = mine(&self.pow, Block::new(transactions, Some(tip)), cancel)?;

        match self.db.commit_block(&block, &tip) {
            Ok(()) => {}
            Err(LedgerError::TipMoved { expected, actual }) => {
                log::warn!("Tip moved to {} while mining on {}", actual, expected);
                *self.tip.write() = actual;
                return Err(LedgerError::TipMoved { expected, actual });
            }
            Err(err) => return Err(err),
        }
        *self.tip.write() = block.hash;

        log::info!(
            "Mined block {} with {} transactions",
            block.hash,
            block.transactions.len()
        );
        Ok(block)
    }

    /// Run [`Ledger::mine_block_with`] on the blocking pool.
    /// Must be called from within a tokio runtime.
    pub fn spawn_mine(
        &self,
        transactions: Vec<Transaction>,
        cancel: CancelToken,
    ) -> JoinHandle<Result<Block>> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.mine_block_with(transactions, &cancel))
    }

    /// Blocks from the tip back to genesis, each checked against the
    /// proof-of-work rule as it is read
    pub fn iter(&self) -> LedgerIterator {
        LedgerIterator::new(self.db.clone(), self.tip(), Some(self.pow))
    }

    /// Blocks from the tip back to genesis, as stored
    pub fn iter_unchecked(&self) -> LedgerIterator {
        LedgerIterator::new(self.db.clone(), self.tip(), None)
    }

    pub fn utxo(&self) -> UtxoResolver<'_> {
        UtxoResolver::new(self)
    }

    /// Find a transaction anywhere in the chain
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        let mut wanted = HashSet::new();
        wanted.insert(*id);
        self.find_transactions(&wanted)?
            .remove(id)
            .ok_or(LedgerError::TransactionNotFound(*id))
    }

    /// Look up every wanted transaction in one walk. Ids not in the chain are
    /// absent from the result.
    pub fn find_transactions(&self, wanted: &HashSet<Hash256>) -> Result<PrevTransactions> {
        collect_transactions(self.iter(), wanted)
    }

    /// Sign every input of `tx` against the outputs it spends
    pub fn sign_transaction(&self, tx: &mut Transaction, key: &SigningKey) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.find_transactions(&referenced_ids(tx))?;
        tx.sign(key, &prev_txs)
    }

    /// Check every input signature. Inputs whose output cannot be found make
    /// the transaction invalid.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.find_transactions(&referenced_ids(tx))?;
        Ok(tx.verify(&prev_txs))
    }

    /// Re-check every stored block: proof of work, stored hash, structure,
    /// parent links and signatures. Returns the number of blocks.
    pub fn verify_chain(&self) -> Result<usize> {
        let validator = self.validator();
        let mut count = 0;

        for block in self.iter_unchecked() {
            let block = block?;
            let hash = block.hash;
            let invalid = |source: ValidationError| LedgerError::InvalidBlock { hash, source };

            validator.validate_block(&block).map_err(invalid)?;
            if let Some(prev) = block.prev_hash {
                if !self.db.has_block(&prev)? {
                    return Err(invalid(ValidationError::MissingParent(prev)));
                }
            }
            // Spends may only reach outputs of strictly older blocks
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                let prev_txs = match block.prev_hash {
                    Some(prev) => collect_transactions(
                        LedgerIterator::new(self.db.clone(), prev, None),
                        &referenced_ids(tx),
                    )?,
                    None => PrevTransactions::new(),
                };
                if !tx.verify(&prev_txs) {
                    return Err(invalid(ValidationError::InvalidSignature(tx.id)));
                }
            }
            count += 1;
        }

        log::info!("Verified {} blocks", count);
        Ok(count)
    }

    /// Checks a mining candidate needs beyond its own structure: each spend
    /// references an existing, unspent output, carries valid signatures and
    /// does not create value. One walk over the chain ending at `tip`.
    fn check_against_chain(&self, transactions: &[Transaction], tip: Hash256) -> Result<()> {
        let spends: Vec<&Transaction> =
            transactions.iter().filter(|tx| !tx.is_coinbase()).collect();
        let candidate_ids: HashSet<Hash256> = transactions.iter().map(|tx| tx.id).collect();
        let wanted: HashSet<Hash256> = spends.iter().flat_map(|tx| referenced_ids(tx)).collect();
        let referenced: HashSet<OutPoint> = spends
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|input| input.outpoint()))
            .collect();

        let mut prev_txs = PrevTransactions::new();
        for block in LedgerIterator::new(self.db.clone(), tip, Some(self.pow)) {
            for tx in block?.transactions {
                if candidate_ids.contains(&tx.id) {
                    return Err(ValidationError::DuplicateTransaction(tx.id).into());
                }
                if !tx.is_coinbase() {
                    let spent = tx.inputs.iter().find(|i| referenced.contains(&i.outpoint()));
                    if let Some(input) = spent {
                        return Err(ValidationError::AlreadySpent(input.outpoint()).into());
                    }
                }
                if wanted.contains(&tx.id) {
                    prev_txs.insert(tx.id, tx);
                }
            }
        }

        for tx in spends {
            let mut input_value = 0u64;
            for input in &tx.inputs {
                let output = prev_txs
                    .get(&input.prev_txid)
                    .and_then(|prev| prev.outputs.get(input.prev_index as usize))
                    .ok_or(ValidationError::MissingOutput(input.outpoint()))?;
                input_value = input_value.saturating_add(output.value);
            }

            if !tx.verify(&prev_txs) {
                return Err(ValidationError::InvalidSignature(tx.id).into());
            }

            let output_value = tx
                .outputs
                .iter()
                .try_fold(0u64, |acc, out| acc.checked_add(out.value));
            match output_value {
                Some(value) if value <= input_value => {}
                _ => return Err(ValidationError::OutputsExceedInputs(tx.id).into()),
            }
        }

        Ok(())
    }
}

/// Run the nonce search and fill in the block's nonce and hash
fn mine(pow: &ProofOfWork, mut block: Block, cancel: &CancelToken) -> Result<Block> {
    let result = pow.run(&block, cancel).ok_or(LedgerError::MiningCancelled)?;
    log::debug!(
        "Found nonce {} after {} attempts in {:.2?} ({:.1} H/s)",
        result.nonce,
        result.attempts,
        result.duration,
        result.hash_rate()
    );
    block.nonce = result.nonce;
    block.hash = result.hash;
    Ok(block)
}

/// Pull every wanted transaction out of `blocks`, stopping once all are found
fn collect_transactions(
    blocks: LedgerIterator,
    wanted: &HashSet<Hash256>,
) -> Result<PrevTransactions> {
    let mut found = PrevTransactions::new();
    if wanted.is_empty() {
        return Ok(found);
    }

    for block in blocks {
        for tx in block?.transactions {
            if wanted.contains(&tx.id) {
                found.insert(tx.id, tx);
            }
        }
        if found.len() == wanted.len() {
            break;
        }
    }
    Ok(found)
}

fn referenced_ids(tx: &Transaction) -> HashSet<Hash256> {
    tx.inputs.iter().map(|input| input.prev_txid).collect()
}
