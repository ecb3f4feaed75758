// Consensus and validation logic

pub mod pow;
pub mod validation;

pub use pow::{CancelToken, DEFAULT_DIFFICULTY_BITS, MiningResult, ProofOfWork, Target};
pub use validation::{BlockValidator, ValidationError};
