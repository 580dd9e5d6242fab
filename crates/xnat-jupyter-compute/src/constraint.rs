//! Placement constraint config administration.

use std::sync::Arc;

use xnat_jupyter_core::{ConfigId, ExecutionScope, CONSTRAINT_SCOPES};
use xnat_jupyter_store::{ConstraintConfig, Store};

use crate::error::{ComputeError, Result};
use crate::guard::ConfigDeleter;
use crate::validation::Violations;

const KIND: &str = "constraint config";
const SEQUENCE: &str = "constraint_configs";

/// CRUD and scope queries over constraint configs.
pub struct ConstraintConfigService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for ConstraintConfigService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> ConstraintConfigService<S> {
    /// Create a new constraint config service.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get a constraint config by id.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    pub fn retrieve(&self, id: ConfigId) -> Result<ConstraintConfig> {
        self.store
            .get_constraint_config(id)?
            .ok_or_else(|| ComputeError::not_found(KIND, id))
    }

    /// All constraint configs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self) -> Result<Vec<ConstraintConfig>> {
        Ok(self.store.list_constraint_configs()?)
    }

    /// Constraint configs whose scopes admit `execution`, in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_available(&self, execution: &ExecutionScope) -> Result<Vec<ConstraintConfig>> {
        Ok(CONSTRAINT_SCOPES.filter_available(self.get_all()?, execution))
    }

    /// Create a constraint config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` listing every violated rule.
    pub fn create(&self, mut config: ConstraintConfig) -> Result<ConstraintConfig> {
        Self::validate(&config)?;
        let id = self.store.next_id(SEQUENCE)?;
        config.id = Some(id);
        self.store.put_constraint_config(&config)?;
        tracing::info!(constraint_id = %id, key = %config.constraint.key, "Created constraint config");
        Ok(config)
    }

    /// Replace an existing constraint config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` when the id is missing or a rule is
    /// violated, and `ComputeError::NotFound` when no such config exists.
    pub fn update(&self, config: ConstraintConfig) -> Result<ConstraintConfig> {
        let Some(id) = config.id else {
            return Err(ComputeError::Validation {
                kind: KIND,
                violations: vec!["id is required to update".to_string()],
            });
        };
        Self::validate(&config)?;
        if self.store.get_constraint_config(id)?.is_none() {
            return Err(ComputeError::not_found(KIND, id));
        }
        self.store.put_constraint_config(&config)?;
        tracing::info!(constraint_id = %id, "Updated constraint config");
        Ok(config)
    }

    fn validate(config: &ConstraintConfig) -> Result<()> {
        let mut v = Violations::new(KIND);
        v.not_blank(&config.constraint.key, "key cannot be blank");
        v.check(
            !config.constraint.values.is_empty(),
            "must have at least one value",
        );
        v.scopes(&CONSTRAINT_SCOPES, &config.scopes);
        v.finish()
    }
}

impl<S: Store> ConfigDeleter for ConstraintConfigService<S> {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        if self.store.get_constraint_config(id)?.is_none() {
            return Err(ComputeError::not_found(KIND, id));
        }
        self.store.delete_constraint_config(id)?;
        tracing::info!(constraint_id = %id, "Deleted constraint config");
        Ok(())
    }
}
