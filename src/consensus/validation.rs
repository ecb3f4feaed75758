// Block and transaction validation

use crate::consensus::pow::ProofOfWork;
use crate::core::{Block, Hash256, OutPoint, SUBSIDY, Transaction};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Block hash doesn't meet PoW target
    #[error("Invalid proof of work")]
    InvalidProofOfWork,
    /// Stored hash differs from the recomputed header hash
    #[error("Stored hash does not match header")]
    HashMismatch,
    #[error("Block has no transactions")]
    NoTransactions,
    #[error("Parent block {0} is not stored")]
    MissingParent(Hash256),
    /// Transaction has no inputs or outputs
    #[error("Transaction {0} is empty")]
    EmptyTransaction(Hash256),
    #[error("Transaction id {0} does not match its content")]
    InvalidTransactionId(Hash256),
    #[error("Coinbase {0} must create exactly the subsidy")]
    InvalidCoinbaseValue(Hash256),
    #[error("Transaction {0} has an invalid signature")]
    InvalidSignature(Hash256),
    #[error("Output {0} is spent twice")]
    DuplicateInput(OutPoint),
    #[error("Output {0} does not exist")]
    MissingOutput(OutPoint),
    #[error("Output {0} is already spent")]
    AlreadySpent(OutPoint),
    #[error("Transaction {0} spends more than its inputs")]
    OutputsExceedInputs(Hash256),
    #[error("Transaction {0} is already in the chain")]
    DuplicateTransaction(Hash256),
}

/// Block validator
pub struct BlockValidator {
    pow: ProofOfWork,
}

impl BlockValidator {
    pub fn new(pow: ProofOfWork) -> Self {
        Self { pow }
    }

    /// Validate proof of work and the stored hash
    pub fn validate_header(&self, block: &Block) -> Result<(), ValidationError> {
        if !self.pow.validate(block) {
            return Err(ValidationError::InvalidProofOfWork);
        }
        if self.pow.header_hash(block, block.nonce) != block.hash {
            return Err(ValidationError::HashMismatch);
        }
        Ok(())
    }

    /// Validate a mined block without consulting the chain
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        self.validate_header(block)?;
        Self::validate_body(&block.transactions)
    }

    /// Structural checks shared by mined blocks and mining candidates
    pub fn validate_body(transactions: &[Transaction]) -> Result<(), ValidationError> {
        if transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        let mut spent = HashSet::new();
        for tx in transactions {
            Self::validate_transaction(tx)?;
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if !spent.insert(input.outpoint()) {
                    return Err(ValidationError::DuplicateInput(input.outpoint()));
                }
            }
        }

        Ok(())
    }

    /// Validate a transaction (context-free checks)
    pub fn validate_transaction(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction(tx.id));
        }

        if tx.id != tx.hash() {
            return Err(ValidationError::InvalidTransactionId(tx.id));
        }

        if tx.is_coinbase() && tx.total_output_value() != SUBSIDY {
            return Err(ValidationError::InvalidCoinbaseValue(tx.id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CancelToken;
    use crate::core::{TxInput, TxOutput};

    fn mined(transactions: Vec<Transaction>) -> (BlockValidator, Block) {
        let pow = ProofOfWork::new(8).unwrap();
        let mut block = Block::with_timestamp(transactions, None, 1_650_000_000);
        let result = pow.run(&block, &CancelToken::new()).unwrap();
        block.nonce = result.nonce;
        block.hash = result.hash;
        (BlockValidator::new(pow), block)
    }

    #[test]
    fn test_validate_mined_block() {
        let coinbase = Transaction::coinbase([1u8; 20], b"genesis".to_vec());
        let (validator, block) = mined(vec![coinbase]);
        assert_eq!(validator.validate_block(&block), Ok(()));
    }

    #[test]
    fn test_hash_mismatch() {
        let coinbase = Transaction::coinbase([1u8; 20], b"genesis".to_vec());
        let (validator, mut block) = mined(vec![coinbase]);
        block.hash = Hash256::zero();
        assert_eq!(validator.validate_header(&block), Err(ValidationError::HashMismatch));
    }

    #[test]
    fn test_invalid_pow() {
        let coinbase = Transaction::coinbase([1u8; 20], b"genesis".to_vec());
        let (validator, mut block) = mined(vec![coinbase]);

        // Find a nonce that misses the 8-bit target
        let pow = ProofOfWork::new(8).unwrap();
        block.nonce = (block.nonce + 1..)
            .find(|nonce| !pow.target().is_valid_hash(&pow.header_hash(&block, *nonce)))
            .unwrap();
        assert_eq!(validator.validate_header(&block), Err(ValidationError::InvalidProofOfWork));
    }

    #[test]
    fn test_validate_block_no_transactions() {
        assert_eq!(BlockValidator::validate_body(&[]), Err(ValidationError::NoTransactions));
    }

    #[test]
    fn test_coinbase_value() {
        let mut coinbase = Transaction::coinbase([1u8; 20], vec![]);
        coinbase.outputs[0].value = SUBSIDY + 1;
        coinbase.id = coinbase.hash();
        assert_eq!(
            BlockValidator::validate_transaction(&coinbase),
            Err(ValidationError::InvalidCoinbaseValue(coinbase.id))
        );
    }

    #[test]
    fn test_stale_id_rejected() {
        let mut tx = Transaction::coinbase([1u8; 20], vec![]);
        tx.outputs[0].pub_key_hash = [2u8; 20];
        assert_eq!(
            BlockValidator::validate_transaction(&tx),
            Err(ValidationError::InvalidTransactionId(tx.id))
        );
    }

    #[test]
    fn test_empty_and_duplicate_inputs() {
        let empty = Transaction::new(vec![], vec![TxOutput::new(1, [1u8; 20])]);
        assert_eq!(
            BlockValidator::validate_transaction(&empty),
            Err(ValidationError::EmptyTransaction(empty.id))
        );

        let prev = Hash256::new([4u8; 32]);
        let first = Transaction::new(vec![TxInput::new(prev, 0, vec![1])], vec![TxOutput::new(1, [1u8; 20])]);
        let second = Transaction::new(vec![TxInput::new(prev, 0, vec![2])], vec![TxOutput::new(1, [2u8; 20])]);
        assert_eq!(
            BlockValidator::validate_body(&[first, second]),
            Err(ValidationError::DuplicateInput(OutPoint::new(prev, 0)))
        );
    }
}
