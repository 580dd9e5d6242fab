//! Common error types for xnat-jupyter.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core parsing helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The scope name is not one of the four known dimensions.
    #[error("unknown scope: {0}")]
    UnknownScope(String),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),
}
