//! The XNAT principal on whose behalf operations run.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// An authenticated XNAT user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XnatUser {
    /// Primary key.
    pub id: UserId,
    /// Login name, also the Hub username.
    pub username: String,
}

impl XnatUser {
    /// Create a user.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}
