// Block data structures

use crate::core::serialize::{read_array, read_len, write_varint};
use crate::core::{Hash256, Serializable, Transaction, sha256};
use crate::{LedgerError, Result};
use std::io::{self, Cursor, Read};
use std::time::{SystemTime, UNIX_EPOCH};

/// Headline carried by the coinbase of every genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: i64,
    /// Transactions in this block
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block, `None` only for genesis
    pub prev_hash: Option<Hash256>,
    /// Proof-of-work hash of the header
    pub hash: Hash256,
    /// Nonce for proof-of-work
    pub nonce: u64,
}

impl Block {
    /// Create an unmined block stamped with the current time
    pub fn new(transactions: Vec<Transaction>, prev_hash: Option<Hash256>) -> Self {
        Self::with_timestamp(transactions, prev_hash, now())
    }

    pub fn with_timestamp(
        transactions: Vec<Transaction>,
        prev_hash: Option<Hash256>,
        timestamp: i64,
    ) -> Self {
        Self {
            timestamp,
            transactions,
            prev_hash,
            hash: Hash256::zero(),
            nonce: 0,
        }
    }

    /// SHA256 over the concatenated transaction ids
    pub fn hash_transactions(&self) -> Hash256 {
        let mut ids = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            ids.extend_from_slice(tx.id.as_bytes());
        }
        sha256(&ids)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
        let timestamp = i64::from_le_bytes(read_array(reader)?);

        let prev_hash = match read_array::<_, 1>(reader)?[0] {
            0 => None,
            1 => Some(Hash256::new(read_array(reader)?)),
            flag => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid prev hash flag: {}", flag),
                ));
            }
        };

        let hash = Hash256::new(read_array(reader)?);
        let nonce = u64::from_le_bytes(read_array(reader)?);

        let tx_count = read_len(reader)?;
        let mut transactions = Vec::with_capacity(tx_count.min(64));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(reader)?);
        }

        Ok(Self {
            timestamp,
            transactions,
            prev_hash,
            hash,
            nonce,
        })
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        match &self.prev_hash {
            Some(prev) => {
                buf.push(1);
                buf.extend_from_slice(prev.as_bytes());
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        write_varint(&mut buf, self.transactions.len() as u64).unwrap();
        for tx in &self.transactions {
            tx.encode_into(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let block = Self::read_from(&mut cursor).map_err(LedgerError::corrupt)?;
        if cursor.position() != data.len() as u64 {
            return Err(LedgerError::corrupt("trailing bytes after block"));
        }
        Ok(block)
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    fn sample_block() -> Block {
        let coinbase = Transaction::coinbase([1u8; 20], GENESIS_COINBASE_DATA.as_bytes().to_vec());
        let spend = Transaction::new(
            vec![TxInput::new(coinbase.id, 0, vec![4u8; 64])],
            vec![TxOutput::new(6, [2u8; 20]), TxOutput::new(4, [1u8; 20])],
        );
        let mut block = Block::with_timestamp(vec![coinbase, spend], Some(Hash256::new([5u8; 32])), 1_700_000_000);
        block.hash = Hash256::new([6u8; 32]);
        block.nonce = 42;
        block
    }

    #[test]
    fn test_genesis_flag() {
        let genesis = Block::with_timestamp(vec![], None, 0);
        assert!(genesis.is_genesis());
        assert!(!sample_block().is_genesis());
    }

    #[test]
    fn test_hash_transactions() {
        let block = sample_block();
        let mut ids = Vec::new();
        ids.extend_from_slice(block.transactions[0].id.as_bytes());
        ids.extend_from_slice(block.transactions[1].id.as_bytes());
        assert_eq!(block.hash_transactions(), sha256(&ids));

        let mut reordered = block.clone();
        reordered.transactions.reverse();
        assert_ne!(reordered.hash_transactions(), block.hash_transactions());
    }

    #[test]
    fn test_block_serialization() {
        let block = sample_block();
        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(block, decoded);

        let genesis = Block::with_timestamp(block.transactions.clone(), None, -5);
        assert_eq!(Block::deserialize(&genesis.serialize()).unwrap(), genesis);
    }

    #[test]
    fn test_corrupt_block_rejected() {
        let bytes = sample_block().serialize();

        assert!(matches!(Block::deserialize(&bytes[..bytes.len() - 3]), Err(LedgerError::Corrupt(_))));

        let mut bad_flag = bytes.clone();
        bad_flag[8] = 7;
        assert!(matches!(Block::deserialize(&bad_flag), Err(LedgerError::Corrupt(_))));

        let mut trailing = bytes;
        trailing.extend_from_slice(&[0, 0]);
        assert!(matches!(Block::deserialize(&trailing), Err(LedgerError::Corrupt(_))));
    }
}
