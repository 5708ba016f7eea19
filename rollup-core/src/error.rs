use num_bigint::BigUint;
use rollup_common::{Float16Error, HashError, StateError, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupted entry: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug)]
pub enum RollupError {
    // Misuse of the batch lifecycle
    #[error("Too many TX per batch")]
    TooManyTx,
    #[error("Batch already builded")]
    AlreadyBuilt,
    #[error("Batch must first be builded")]
    NotBuilt,
    #[error("Batch build failed, it must be discarded")]
    BuildFailed,
    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
    #[error("Maximum {max} coins per fee plan")]
    FeePlanFull { max: usize },
    #[error("Coin {coin} does not fit fee plan slot {slot}")]
    FeePlanCoinTooBig { slot: usize, coin: u32 },
    #[error("Coin {0} already in fee plan")]
    FeePlanDuplicateCoin(u32),

    // Data integrity
    #[error("trying to send to a wrong address")]
    InvalidRecipient { to_idx: u64 },
    #[error("trying to send from a nonexistent account")]
    InvalidSender { from_idx: u64 },
    #[error("underflow")]
    Underflow { idx: u64 },
    #[error("Invalid Exit account")]
    DuplicateExit { idx: u64 },
    #[error("Invalid coin: expected {expected}, got {got}")]
    CoinMismatch { expected: u32, got: u32 },
    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error("Id does not exist")]
    IdNotFound(u64),
    #[error("Key already exists: {0}")]
    KeyExists(BigUint),
    #[error("Key does not exist: {0}")]
    KeyNotFound(BigUint),
    #[error("Batch mismatch: expected {expected}, got {got}")]
    BatchMismatch { expected: String, got: String },
    #[error("Batch {0} not found")]
    BatchNotFound(u64),
    #[error("Index {0} does not fit the tree")]
    IdxOverflow(u64),
    #[error("Witness slot {slot}: {reason}")]
    WitnessSlot { slot: usize, reason: &'static str },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Float encoding error: {0}")]
    Float(#[from] Float16Error),
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Db(#[from] DbError),
}
