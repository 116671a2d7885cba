//! Top-level error type for the relay.
//!
//! Each subsystem keeps its own error enum; `RelayError` is what crosses
//! component boundaries (server startup, dispatcher actions, the binary).

use std::path::PathBuf;
use thiserror::Error;

use crate::cipher::CipherError;
use crate::config::ConfigError;
use crate::ledger::StoreError;
use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or unexpected bytes from a peer
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O failure or unparsable persisted state
    #[error(transparent)]
    Storage(StoreError),

    /// The data directory belongs to another process
    #[error("Storage lock unavailable: {} is held by another process", .0.display())]
    LockUnavailable(PathBuf),

    /// Failure reported by the cipher capability
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener or socket failure outside a session
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking storage task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockUnavailable { path } => RelayError::LockUnavailable(path),
            other => RelayError::Storage(other),
        }
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(err: tokio::task::JoinError) -> Self {
        RelayError::Task(err.to_string())
    }
}
