// Chain state: the ledger, block iteration and UTXO queries

mod iterator;
mod ledger;
mod utxo;

pub use iterator::LedgerIterator;
pub use ledger::Ledger;
pub use utxo::{UnspentOutputs, UtxoResolver};
