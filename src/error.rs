//! Error types for HelixChain

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Structurally invalid input, rejected before any state is touched.
    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Well-formed and policy-valid, but the declared accounts hash does not
    /// match the recomputed state. Treated as a tampering signal by callers.
    #[error("Accounts hash mismatch: {0}")]
    AccountsHashMismatch(String),

    #[error("Orphan block")]
    OrphanBlock,

    #[error("Block already exists")]
    BlockAlreadyExists,

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Mempool is full")]
    MempoolFull,

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
