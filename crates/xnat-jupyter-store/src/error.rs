//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A record was written without an assigned id.
    #[error("record has no id: {0}")]
    MissingId(&'static str),

    /// A key in an index column family could not be decoded.
    #[error("corrupt key in {cf}: {reason}")]
    CorruptKey {
        /// Column family holding the key.
        cf: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
