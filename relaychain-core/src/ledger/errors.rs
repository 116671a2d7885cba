/*
    errors.rs - Error types for the storage layer

    Covers the ledger file, the member list and the data directory lock.
*/

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing persisted relay state
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage I/O error
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted ledger line could not be decoded
    #[error("Corrupted record at line {line}: {reason}")]
    CorruptRecord { line: usize, reason: String },

    /// The last ledger record is unusable; the chain cannot be resumed
    #[error("Corrupted ledger tail: {0}")]
    CorruptTail(String),

    /// Full verification found a broken link or a mismatched hash
    #[error("Chain broken at block {index}: {reason}")]
    ChainBroken { index: u64, reason: String },

    /// A member entry that cannot be written as one registry line
    #[error("Invalid member entry: {0}")]
    InvalidMember(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process owns the data directory
    #[error("Storage lock unavailable: {} is held by another process", path.display())]
    LockUnavailable { path: PathBuf },

    /// A thread panicked while holding a storage guard
    #[error("Storage guard poisoned: {0}")]
    Poisoned(&'static str),

    /// System clock reads before the unix epoch
    #[error("Clock error: {0}")]
    Clock(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
