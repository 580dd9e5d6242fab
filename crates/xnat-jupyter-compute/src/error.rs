//! Error types for compute configuration and template resolution.

use std::fmt;

use thiserror::Error;
use xnat_jupyter_store::StoreError;

/// A result type using `ComputeError`.
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Errors that can occur in configuration and resolution operations.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// A referenced config does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record, e.g. "hardware config".
        kind: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// One or more structural rules were violated. All violations are reported.
    #[error("{kind} is invalid: {}", .violations.join(", "))]
    Validation {
        /// Kind of record being validated.
        kind: &'static str,
        /// Every violated rule.
        violations: Vec<String>,
    },

    /// Scope rules deny access to the requested resources.
    #[error("not available: {0}")]
    Unavailable(String),

    /// The operation is blocked by a pinned reference.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller-supplied ids disagree with a pinned reference.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ComputeError {
    /// Build a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation { .. } | Self::InvalidReference(_) => 400,
            Self::Unavailable(_) => 403,
            Self::Conflict(_) => 409,
            Self::Store(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(ComputeError::not_found("hardware config", 3).http_status_code(), 404);
        assert_eq!(
            ComputeError::Validation {
                kind: "hardware config",
                violations: vec!["name cannot be blank".into()],
            }
            .http_status_code(),
            400
        );
        assert_eq!(ComputeError::Unavailable("x".into()).http_status_code(), 403);
        assert_eq!(ComputeError::Conflict("x".into()).http_status_code(), 409);
        assert!(ComputeError::Store(StoreError::Database("io".into())).is_retriable());
        assert!(!ComputeError::Conflict("x".into()).is_retriable());
    }

    #[test]
    fn validation_message_joins_violations() {
        let err = ComputeError::Validation {
            kind: "compute environment config",
            violations: vec!["name cannot be blank".into(), "image cannot be blank".into()],
        };
        assert_eq!(
            err.to_string(),
            "compute environment config is invalid: name cannot be blank, image cannot be blank"
        );
    }
}
