//! XNAT-side services the orchestrator depends on.
//!
//! Permission evaluation, archive layout and credential issuance live in XNAT
//! itself; these traits are the seams where a deployment plugs them in.

use std::collections::BTreeMap;

use xnat_jupyter_core::{TrackingId, XnatUser};

use crate::error::Result;

/// Decides whether a user may read a data item.
pub trait PermissionChecker: Send + Sync {
    /// Whether `user` may read the item of `xsi_type` with `item_id` in `project_id`.
    fn can_read(&self, user: &XnatUser, project_id: &str, item_id: &str, xsi_type: &str) -> bool;
}

/// The item being mounted into a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveItem<'a> {
    /// XNAT data type.
    pub xsi_type: &'a str,
    /// Item id.
    pub item_id: &'a str,
    /// Owning project.
    pub project_id: &'a str,
}

/// Finds where an item's data lives in the archive.
pub trait ArchiveLocator: Send + Sync {
    /// Container path to archive path for every directory of the item.
    ///
    /// Paths are untranslated; the caller maps them onto the container host.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be inspected.
    fn data_paths(
        &self,
        user: &XnatUser,
        item: ArchiveItem<'_>,
        tracking_id: &TrackingId,
    ) -> Result<BTreeMap<String, String>>;
}

/// A short-lived login handed to a notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Token alias, used as the username.
    pub alias: String,
    /// Token secret, used as the password.
    pub secret: String,
}

/// Issues credentials a notebook uses to call back into XNAT.
pub trait CredentialIssuer: Send + Sync {
    /// Issue credentials for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if a token cannot be issued.
    fn issue(&self, user: &XnatUser) -> Result<Credentials>;
}

/// Fixed collaborators for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::{BTreeMap, BTreeSet};

    use parking_lot::Mutex;
    use xnat_jupyter_core::{TrackingId, XnatUser};

    use super::{ArchiveItem, ArchiveLocator, CredentialIssuer, Credentials, PermissionChecker};
    use crate::error::Result;

    /// Grants read access to a fixed set of (username, item id) pairs.
    #[derive(Debug, Default)]
    pub struct StaticPermissions {
        readable: Mutex<BTreeSet<(String, String)>>,
    }

    impl StaticPermissions {
        /// Deny everything.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Let `username` read `item_id`.
        pub fn grant(&self, username: &str, item_id: &str) {
            self.readable
                .lock()
                .insert((username.to_string(), item_id.to_string()));
        }

        /// Take back access to `item_id`.
        pub fn revoke(&self, username: &str, item_id: &str) {
            self.readable
                .lock()
                .remove(&(username.to_string(), item_id.to_string()));
        }
    }

    impl PermissionChecker for StaticPermissions {
        fn can_read(&self, user: &XnatUser, _project: &str, item_id: &str, _xsi: &str) -> bool {
            self.readable
                .lock()
                .contains(&(user.username.clone(), item_id.to_string()))
        }
    }

    /// Lays every item out under `/data/xnat/archive/<project>/arc001`.
    #[derive(Debug, Default)]
    pub struct StaticArchive;

    impl ArchiveLocator for StaticArchive {
        fn data_paths(
            &self,
            _user: &XnatUser,
            item: ArchiveItem<'_>,
            _tracking_id: &TrackingId,
        ) -> Result<BTreeMap<String, String>> {
            let project = item.project_id;
            Ok(BTreeMap::from([
                (
                    format!("/data/projects/{project}/experiments"),
                    format!("/data/xnat/archive/{project}/arc001"),
                ),
                (
                    format!("/data/projects/{project}/resources"),
                    format!("/data/xnat/archive/{project}/resources"),
                ),
            ]))
        }
    }

    /// Issues `alias-<username>` / `secret-<username>`.
    #[derive(Debug, Default)]
    pub struct StaticCredentials;

    impl CredentialIssuer for StaticCredentials {
        fn issue(&self, user: &XnatUser) -> Result<Credentials> {
            Ok(Credentials {
                alias: format!("alias-{}", user.username),
                secret: format!("secret-{}", user.username),
            })
        }
    }
}
