// Proof-of-work UTXO ledger
// Single node: blocks in a sled store, P-256 signatures, chain-scan balances

pub mod chain;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::chain::{Ledger, LedgerIterator, UtxoResolver};
pub use crate::cli::{Cli, CliHandler, Commands};
pub use crate::config::Config;
pub use crate::consensus::{BlockValidator, CancelToken, ProofOfWork, Target, ValidationError};
pub use crate::core::{Block, Hash256, OutPoint, Transaction, TxInput, TxOutput};
pub use crate::error::{LedgerError, Result};
pub use crate::storage::BlockchainDB;
pub use crate::wallet::{Address, KeyPair, Keystore, TransactionBuilder};
