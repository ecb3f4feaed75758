// Error types for the ledger

use crate::consensus::ValidationError;
use crate::core::Hash256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Keystore error: {0}")]
    Keystore(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address {0} is not in the wallet")]
    UnknownAddress(String),

    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash256),

    #[error("Output {index} of transaction {txid} not found")]
    OutputNotFound { txid: Hash256, index: u32 },

    #[error("Invalid block {hash}: {source}")]
    InvalidBlock {
        hash: Hash256,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("No ledger found, create one first")]
    NotInitialized,

    #[error("Ledger already exists")]
    AlreadyInitialized,

    #[error("Chain tip moved from {expected} to {actual} while mining")]
    TipMoved { expected: Hash256, actual: Hash256 },

    #[error("Mining cancelled")]
    MiningCancelled,

    #[error("Mining worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl LedgerError {
    pub fn corrupt(err: impl std::fmt::Display) -> Self {
        LedgerError::Corrupt(err.to_string())
    }

    /// Store, file and decode failures. Everything else rejects a single
    /// request and leaves the ledger untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_)
                | LedgerError::Io(_)
                | LedgerError::Corrupt(_)
                | LedgerError::Keystore(_)
                | LedgerError::Config(_)
                | LedgerError::Worker(_)
        )
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl From<p256::ecdsa::Error> for LedgerError {
    fn from(err: p256::ecdsa::Error) -> Self {
        LedgerError::Crypto(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
