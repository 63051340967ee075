//! Error types for checkpoint and memory store operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Append rejected because the sequence is not exactly `last + 1`
    #[error("Sequence conflict on thread '{thread_id}': expected {expected}, got {actual}")]
    SequenceConflict {
        thread_id: String,
        expected: u64,
        actual: u64,
    },

    /// Thread or checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Invalid checkpoint
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Backend unavailable or failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    /// `true` when the failure is the optimistic sequence guard rather than the backend.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CheckpointError::SequenceConflict { .. })
    }
}

/// Errors raised by [`MemoryStore`](crate::store::MemoryStore) backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// Result type for memory store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
