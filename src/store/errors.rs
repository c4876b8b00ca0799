//! # Content Store Errors

use thiserror::Error;

use crate::blob::BlobError;
use crate::meta::MetaError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Content store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Bad create parameters, rejected before any write
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Token absent, expired, or read-exhausted. One variant for all three,
    /// so a caller can never learn whether a token ever existed.
    #[error("Not found or expired")]
    NotFoundOrExpired,

    /// Bounded token generation failed; fatal for this create only
    #[error("Token space exhausted after {0} attempts")]
    TokenSpaceExhausted(u32),

    /// The blob medium rejected a write or read
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The metadata store is unreachable or busy
    #[error("Persistence unavailable: {0}")]
    Persistence(String),
}

impl From<MetaError> for StoreError {
    fn from(e: MetaError) -> Self {
        StoreError::Persistence(e.to_string())
    }
}

impl StoreError {
    /// HTTP status code for the transport boundary
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::Validation(_) => 400,
            StoreError::NotFoundOrExpired => 404,
            StoreError::TokenSpaceExhausted(_) => 500,
            StoreError::Blob(BlobError::StorageFull) => 507,
            StoreError::Blob(BlobError::RangeNotSatisfiable { .. }) => 416,
            StoreError::Blob(BlobError::NotFound(_)) => 404,
            StoreError::Blob(_) => 500,
            StoreError::Persistence(_) => 503,
        }
    }

    /// Whether the caller may reasonably retry the operation
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Blob(e) => e.is_retryable(),
            StoreError::Persistence(_) => true,
            _ => false,
        }
    }
}
