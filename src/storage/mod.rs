// Storage layer for the block store

mod blockchain_db;

pub use blockchain_db::BlockchainDB;
