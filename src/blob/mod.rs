//! # Blob Storage
//!
//! Filesystem-backed binary content for blob-kind records. Write-once,
//! read-many-until-deleted, delete-on-expire. The module owns storage-path
//! construction and naming so the rest of the store never touches paths:
//! every `put` lands at a fresh entropy-derived location and can never
//! silently overwrite an existing file.

pub mod errors;
pub mod store;

pub use errors::{BlobError, BlobResult};
pub use store::{BlobRef, BlobStore, PutOutcome};
