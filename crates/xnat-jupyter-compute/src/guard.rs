//! In-use guards for deletes.
//!
//! A [`GuardedDelete`] wraps any [`ConfigDeleter`] with a [`UsageCheck`] and
//! refuses the delete with `Conflict` while something still references the
//! config. Dashboard configs pin one environment and one hardware config, and
//! those pins outrank pool membership. The environment and hardware services
//! consult [`DashboardPins`] on every delete:
//!
//! ```text
//!   GuardedDelete ──► DashboardPins::users_of(id) ──non-empty──► Conflict
//!        │
//!        └────────────────────────────────────────────empty──► inner.delete(id)
//! ```

use std::sync::Arc;

use xnat_jupyter_core::ConfigId;
use xnat_jupyter_store::{DashboardConfig, Store};

use crate::error::{ComputeError, Result};

/// Something that can delete configs of one kind.
pub trait ConfigDeleter: Send + Sync {
    /// Human-readable kind, used in error messages.
    fn kind(&self) -> &'static str;

    /// Delete the config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    fn delete(&self, id: ConfigId) -> Result<()>;
}

/// Reports which records still reference a config.
pub trait UsageCheck: Send + Sync {
    /// Ids of the records referencing `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn users_of(&self, id: ConfigId) -> Result<Vec<ConfigId>>;

    /// Fail with `Conflict` if anything still references `id`.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Conflict` naming the referencing records.
    fn ensure_unused(&self, kind: &'static str, id: ConfigId) -> Result<()> {
        let users = self.users_of(id)?;
        if users.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = users.iter().map(ToString::to_string).collect();
        tracing::warn!(kind, config_id = %id, users = ?ids, "Delete refused");
        Err(ComputeError::Conflict(format!(
            "{kind} {id} is in use by dashboard configs [{}]",
            ids.join(", ")
        )))
    }
}

/// A deleter that first consults a usage check.
pub struct GuardedDelete<D, U> {
    inner: D,
    usage: U,
}

impl<D: ConfigDeleter, U: UsageCheck> GuardedDelete<D, U> {
    /// Compose a deleter with a usage check.
    #[must_use]
    pub const fn new(inner: D, usage: U) -> Self {
        Self { inner, usage }
    }

    /// The wrapped deleter.
    #[must_use]
    pub const fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ConfigDeleter, U: UsageCheck> ConfigDeleter for GuardedDelete<D, U> {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        self.usage.ensure_unused(self.kind(), id)?;
        self.inner.delete(id)
    }
}

/// Which pinned reference of a dashboard config to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    /// The pinned compute environment config.
    Environment,
    /// The pinned hardware config.
    Hardware,
}

impl Pin {
    fn of(self, config: &DashboardConfig) -> Option<ConfigId> {
        match self {
            Self::Environment => config.compute_environment_config_id,
            Self::Hardware => config.hardware_config_id,
        }
    }
}

/// Usage check over dashboard pins.
pub struct DashboardPins<S: Store> {
    store: Arc<S>,
    pin: Pin,
}

impl<S: Store> Clone for DashboardPins<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            pin: self.pin,
        }
    }
}

impl<S: Store> DashboardPins<S> {
    /// Check the given pin across all dashboard configs.
    #[must_use]
    pub const fn new(store: Arc<S>, pin: Pin) -> Self {
        Self { store, pin }
    }
}

impl<S: Store> UsageCheck for DashboardPins<S> {
    fn users_of(&self, id: ConfigId) -> Result<Vec<ConfigId>> {
        Ok(self
            .store
            .list_dashboard_configs()?
            .into_iter()
            .filter(|dashboard| self.pin.of(dashboard) == Some(id))
            .filter_map(|dashboard| dashboard.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingDeleter {
        deleted: Mutex<Vec<ConfigId>>,
    }

    impl ConfigDeleter for RecordingDeleter {
        fn kind(&self) -> &'static str {
            "thing"
        }

        fn delete(&self, id: ConfigId) -> Result<()> {
            self.deleted.lock().push(id);
            Ok(())
        }
    }

    struct FixedUsage(Vec<ConfigId>);

    impl UsageCheck for FixedUsage {
        fn users_of(&self, _id: ConfigId) -> Result<Vec<ConfigId>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn unused_config_is_deleted() {
        let guarded = GuardedDelete::new(RecordingDeleter::default(), FixedUsage(vec![]));
        guarded.delete(ConfigId::new(1)).unwrap();
        assert_eq!(*guarded.inner().deleted.lock(), vec![ConfigId::new(1)]);
    }

    #[test]
    fn used_config_is_refused_without_calling_inner() {
        let guarded = GuardedDelete::new(
            RecordingDeleter::default(),
            FixedUsage(vec![ConfigId::new(7), ConfigId::new(8)]),
        );

        let result = guarded.delete(ConfigId::new(1));

        match result {
            Err(ComputeError::Conflict(message)) => {
                assert_eq!(message, "thing 1 is in use by dashboard configs [7, 8]");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(guarded.inner().deleted.lock().is_empty());
    }
}
