//! # Blob Storage Errors

use thiserror::Error;

/// Result type for blob operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Blob storage errors
#[derive(Debug, Clone, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Range not satisfiable: offset {offset} of {size} bytes")]
    RangeNotSatisfiable { offset: u64, size: u64 },

    #[error("Storage full")]
    StorageFull,

    #[error("Blob name space exhausted")]
    NameSpaceExhausted,

    #[error("I/O error: {0}")]
    Io(String),
}

impl BlobError {
    /// Whether the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::StorageFull | BlobError::Io(_))
    }
}
