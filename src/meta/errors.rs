//! # Metadata Store Errors

use thiserror::Error;

/// Result type for metadata operations
pub type MetaResult<T> = Result<T, MetaError>;

/// Metadata persistence errors
#[derive(Debug, Clone, Error)]
pub enum MetaError {
    #[error("Metadata write failed: {0}")]
    WriteFailed(String),

    #[error("Metadata read failed: {0}")]
    ReadFailed(String),

    #[error("Record log corrupted at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("Metadata store busy: lock not acquired within {0}ms")]
    LockTimeout(u64),

    #[error("Metadata lock poisoned")]
    LockPoisoned,
}

impl MetaError {
    /// Whether the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, MetaError::LockTimeout(_) | MetaError::WriteFailed(_))
    }
}
