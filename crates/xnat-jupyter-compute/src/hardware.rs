//! Hardware config administration.

use std::sync::Arc;

use xnat_jupyter_core::{ConfigId, ExecutionScope, HARDWARE_SCOPES};
use xnat_jupyter_store::{HardwareConfig, Store};

use crate::associations::HardwareAssociationManager;
use crate::error::{ComputeError, Result};
use crate::guard::{ConfigDeleter, DashboardPins, Pin, UsageCheck};
use crate::validation::Violations;

const KIND: &str = "hardware config";
const SEQUENCE: &str = "hardware_configs";

/// CRUD and scope queries over hardware configs.
pub struct HardwareConfigService<S: Store> {
    store: Arc<S>,
    associations: HardwareAssociationManager<S>,
    pins: DashboardPins<S>,
}

impl<S: Store> Clone for HardwareConfigService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            associations: self.associations.clone(),
            pins: self.pins.clone(),
        }
    }
}

impl<S: Store> HardwareConfigService<S> {
    /// Create a new hardware config service.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        let associations = HardwareAssociationManager::new(Arc::clone(&store));
        let pins = DashboardPins::new(Arc::clone(&store), Pin::Hardware);
        Self {
            store,
            associations,
            pins,
        }
    }

    /// Whether a hardware config exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn exists(&self, id: ConfigId) -> Result<bool> {
        Ok(self.store.get_hardware_config(id)?.is_some())
    }

    /// Get a hardware config by id.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    pub fn retrieve(&self, id: ConfigId) -> Result<HardwareConfig> {
        self.store
            .get_hardware_config(id)?
            .ok_or_else(|| ComputeError::not_found(KIND, id))
    }

    /// All hardware configs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self) -> Result<Vec<HardwareConfig>> {
        Ok(self.store.list_hardware_configs()?)
    }

    /// Whether the hardware config exists and its scopes admit `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_available(&self, id: ConfigId, execution: &ExecutionScope) -> Result<bool> {
        Ok(self
            .store
            .get_hardware_config(id)?
            .is_some_and(|hw| HARDWARE_SCOPES.is_available(&hw, execution)))
    }

    /// Hardware configs whose scopes admit `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_available(&self, execution: &ExecutionScope) -> Result<Vec<HardwareConfig>> {
        Ok(HARDWARE_SCOPES.filter_available(self.get_all()?, execution))
    }

    /// Create a hardware config. It joins every environment that allows all hardware.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` listing every violated rule.
    pub fn create(&self, mut config: HardwareConfig) -> Result<HardwareConfig> {
        Self::validate(&config)?;
        config.id = Some(self.store.next_id(SEQUENCE)?);

        let joined = self.associations.save_hardware(&config)?;
        tracing::info!(
            hardware_id = ?config.id,
            name = %config.hardware.name,
            joined = joined.len(),
            "Created hardware config"
        );
        Ok(config)
    }

    /// Replace an existing hardware config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` when the id is missing or a rule is
    /// violated, and `ComputeError::NotFound` when no such config exists.
    pub fn update(&self, config: HardwareConfig) -> Result<HardwareConfig> {
        let Some(id) = config.id else {
            return Err(ComputeError::Validation {
                kind: KIND,
                violations: vec!["id is required to update".to_string()],
            });
        };
        Self::validate(&config)?;
        if !self.exists(id)? {
            return Err(ComputeError::not_found(KIND, id));
        }

        self.associations.save_hardware(&config)?;
        tracing::info!(hardware_id = %id, "Updated hardware config");
        Ok(config)
    }

    fn validate(config: &HardwareConfig) -> Result<()> {
        let mut v = Violations::new(KIND);
        v.not_blank(&config.hardware.name, "name cannot be blank");
        v.scopes(&HARDWARE_SCOPES, &config.scopes);
        v.finish()
    }
}

impl<S: Store> ConfigDeleter for HardwareConfigService<S> {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        if !self.exists(id)? {
            return Err(ComputeError::not_found(KIND, id));
        }
        self.pins.ensure_unused(KIND, id)?;
        let parents = self.associations.delete_hardware(id)?;
        tracing::info!(hardware_id = %id, unlinked = parents.len(), "Deleted hardware config");
        Ok(())
    }
}
