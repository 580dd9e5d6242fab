//! Error types for the server crate.

use thiserror::Error;

/// Errors that can occur while starting, stopping or culling Hub servers.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A start request broke one or more rules.
    #[error("invalid start request: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// The user may not read the target item.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The requested compute pair is not available to the caller.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The Hub could not be reached or rejected our credentials.
    #[error("JupyterHub unreachable: {0}")]
    HubUnreachable(String),

    /// A server with this name is already running.
    #[error("server already exists: {0}")]
    AlreadyExists(String),

    /// A start or stop for this server is still in flight.
    #[error("operation in progress: {0}")]
    OperationInProgress(String),

    /// The Hub has no such user.
    #[error("JupyterHub user not found: {0}")]
    UserNotFound(String),

    /// A poll loop ran out of time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The worker queue is full.
    #[error("job queue is full")]
    QueueFull,

    /// The Hub answered with an unexpected status.
    #[error("JupyterHub returned {status}: {message}")]
    Hub {
        /// HTTP status code.
        status: u16,
        /// Error text from the response body.
        message: String,
    },

    /// Compute configuration error.
    #[error(transparent)]
    Compute(#[from] xnat_jupyter_compute::ComputeError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] xnat_jupyter_store::StoreError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::HubUnreachable(_) | Self::Timeout(_) | Self::QueueFull => true,
            Self::Hub { status, .. } => *status >= 500,
            Self::Compute(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::PermissionDenied(_) | Self::Unavailable(_) => 403,
            Self::UserNotFound(_) => 404,
            Self::AlreadyExists(_) | Self::OperationInProgress(_) => 409,
            Self::Timeout(_) => 504,
            Self::HubUnreachable(_) | Self::QueueFull | Self::Hub { .. } => 503,
            Self::Compute(e) => e.http_status_code(),
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
