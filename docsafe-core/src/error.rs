//! Error types and result types for document store operations.
//!
//! Local precondition failures ([`Validation`](DocumentStoreError::Validation),
//! [`Concurrency`](DocumentStoreError::Concurrency) and [`Usage`](DocumentStoreError::Usage))
//! are raised before any store call is made. Everything else is surfaced by the
//! underlying store and is propagated to the caller unchanged.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A local precondition failed, such as a record without an `id` passed to `set`.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A transaction or batch was started while another one is active on the same context.
    #[error("Concurrency error: {0}")]
    Concurrency(String),
    /// A query builder method was used in a way the query cannot express.
    #[error("Usage error: {0}")]
    Usage(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection path.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The document violates the store's constraints or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A transaction attempted a read after it had already queued a write.
    #[error("Read after write: {0}")]
    ReadAfterWrite(String),
    /// A transaction could not commit because data it read has changed since.
    #[error("Transaction aborted: {0}")]
    Aborted(String),
    /// A transaction or batch handle was used after it was committed or rolled back.
    #[error("Handle closed: {0}")]
    Closed(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}
