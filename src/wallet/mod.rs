// Wallet: addresses, keys and transaction building

mod address;
mod keystore;
mod tx_builder;

pub use address::{Address, VERSION, validate_address};
pub use keystore::{KeyPair, Keystore};
pub use tx_builder::{TransactionBuilder, build_spend, new_coinbase};
