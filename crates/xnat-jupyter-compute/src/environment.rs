//! Compute environment config administration.

use std::sync::Arc;

use xnat_jupyter_core::{ConfigId, ExecutionScope, ENVIRONMENT_SCOPES, HARDWARE_SCOPES};
use xnat_jupyter_store::{ComputeEnvironmentConfig, ConfigType, Store};

use crate::associations::HardwareAssociationManager;
use crate::error::{ComputeError, Result};
use crate::guard::{ConfigDeleter, DashboardPins, Pin, UsageCheck};
use crate::validation::Violations;

const KIND: &str = "compute environment config";
const SEQUENCE: &str = "environment_configs";

/// CRUD and scope queries over compute environment configs.
///
/// Configs returned from this service carry their effective hardware list.
pub struct ComputeEnvironmentConfigService<S: Store> {
    store: Arc<S>,
    associations: HardwareAssociationManager<S>,
    pins: DashboardPins<S>,
}

impl<S: Store> Clone for ComputeEnvironmentConfigService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            associations: self.associations.clone(),
            pins: self.pins.clone(),
        }
    }
}

impl<S: Store> ComputeEnvironmentConfigService<S> {
    /// Create a new environment config service.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        let associations = HardwareAssociationManager::new(Arc::clone(&store));
        let pins = DashboardPins::new(Arc::clone(&store), Pin::Environment);
        Self {
            store,
            associations,
            pins,
        }
    }

    /// The association manager backing this service.
    #[must_use]
    pub const fn associations(&self) -> &HardwareAssociationManager<S> {
        &self.associations
    }

    /// Whether an environment config exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn exists(&self, id: ConfigId) -> Result<bool> {
        Ok(self.store.get_environment_config(id)?.is_some())
    }

    /// Get an environment config by id.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    pub fn retrieve(&self, id: ConfigId) -> Result<ComputeEnvironmentConfig> {
        let config = self
            .store
            .get_environment_config(id)?
            .ok_or_else(|| ComputeError::not_found(KIND, id))?;
        self.associations.hydrate(config)
    }

    /// All environment configs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self) -> Result<Vec<ComputeEnvironmentConfig>> {
        self.store
            .list_environment_configs()?
            .into_iter()
            .map(|config| self.associations.hydrate(config))
            .collect()
    }

    /// Environment configs tagged with `config_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_by_type(&self, config_type: ConfigType) -> Result<Vec<ComputeEnvironmentConfig>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|config| config.config_types.contains(&config_type))
            .collect())
    }

    /// Whether the environment config exists and its scopes admit `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_available(&self, id: ConfigId, execution: &ExecutionScope) -> Result<bool> {
        Ok(self
            .store
            .get_environment_config(id)?
            .is_some_and(|config| ENVIRONMENT_SCOPES.is_available(&config, execution)))
    }

    /// Environment configs available to `execution`, optionally of one type.
    ///
    /// Each returned config's hardware list is narrowed to the hardware that is
    /// itself available to `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_available(
        &self,
        config_type: Option<ConfigType>,
        execution: &ExecutionScope,
    ) -> Result<Vec<ComputeEnvironmentConfig>> {
        let candidates = match config_type {
            Some(config_type) => self.get_by_type(config_type)?,
            None => self.get_all()?,
        };

        Ok(ENVIRONMENT_SCOPES
            .filter_available(candidates, execution)
            .into_iter()
            .map(|mut config| {
                let hardware = std::mem::take(&mut config.hardware_options.hardware_configs);
                config.hardware_options.hardware_configs =
                    HARDWARE_SCOPES.filter_available(hardware, execution);
                config
            })
            .collect())
    }

    /// Create an environment config and link its hardware.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` listing every violated rule.
    pub fn create(&self, mut config: ComputeEnvironmentConfig) -> Result<ComputeEnvironmentConfig> {
        Self::validate(&config)?;
        let id = self.store.next_id(SEQUENCE)?;
        config.id = Some(id);

        let links = self.associations.save_environment(&config)?;
        tracing::info!(
            environment_id = %id,
            name = %config.compute_environment.name,
            hardware = links.len(),
            "Created compute environment config"
        );
        self.retrieve(id)
    }

    /// Replace an existing environment config and rebuild its hardware links.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` when the id is missing or a rule is
    /// violated, and `ComputeError::NotFound` when no such config exists.
    pub fn update(&self, config: ComputeEnvironmentConfig) -> Result<ComputeEnvironmentConfig> {
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

        let links = self.associations.save_environment(&config)?;
        tracing::info!(environment_id = %id, hardware = links.len(), "Updated compute environment config");
        self.retrieve(id)
    }

    fn validate(config: &ComputeEnvironmentConfig) -> Result<()> {
        let mut v = Violations::new(KIND);
        v.check(
            !config.config_types.is_empty(),
            "must have at least one config type",
        );
        v.not_blank(&config.compute_environment.name, "name cannot be blank");
        v.not_blank(&config.compute_environment.image, "image cannot be blank");
        v.scopes(&ENVIRONMENT_SCOPES, &config.scopes);
        v.finish()
    }
}

impl<S: Store> ConfigDeleter for ComputeEnvironmentConfigService<S> {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        if !self.exists(id)? {
            return Err(ComputeError::not_found(KIND, id));
        }
        self.pins.ensure_unused(KIND, id)?;
        self.associations.delete_environment(id)?;
        tracing::info!(environment_id = %id, "Deleted compute environment config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareConfigService;
    use crate::testing::{environment_config, hardware_config, open_scopes, user_project_scopes};
    use tempfile::TempDir;
    use xnat_jupyter_core::ScopeMap;
    use xnat_jupyter_store::{HardwareConfig, RocksStore};

    struct Fixture {
        environments: ComputeEnvironmentConfigService<RocksStore>,
        hardware: HardwareConfigService<RocksStore>,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        Fixture {
            environments: ComputeEnvironmentConfigService::new(Arc::clone(&store)),
            hardware: HardwareConfigService::new(store),
            _dir: dir,
        }
    }

    fn exec() -> ExecutionScope {
        ExecutionScope::new().user("u1").project("p1")
    }

    fn names(configs: &[HardwareConfig]) -> Vec<&str> {
        configs.iter().map(|hw| hw.hardware.name.as_str()).collect()
    }

    #[test]
    fn create_links_listed_hardware() {
        let f = setup();
        let small = f.hardware.create(hardware_config("small", open_scopes())).unwrap();
        f.hardware.create(hardware_config("large", open_scopes())).unwrap();

        let created = f
            .environments
            .create(environment_config("scipy", false, vec![small.clone()]))
            .unwrap();

        assert_eq!(created.id, Some(ConfigId::new(1)));
        assert_eq!(names(&created.hardware_options.hardware_configs), vec!["small"]);
    }

    #[test]
    fn allow_all_sees_hardware_created_later() {
        let f = setup();
        let env = f
            .environments
            .create(environment_config("scipy", true, vec![]))
            .unwrap();

        f.hardware.create(hardware_config("gpu", open_scopes())).unwrap();

        let retrieved = f.environments.retrieve(env.id.unwrap()).unwrap();
        assert_eq!(names(&retrieved.hardware_options.hardware_configs), vec!["gpu"]);
    }

    #[test]
    fn validation_collects_every_rule() {
        let f = setup();
        let mut config = environment_config(" ", false, vec![]);
        config.config_types.clear();
        config.compute_environment.image = String::new();
        config.scopes = ScopeMap::new();

        match f.environments.create(config) {
            Err(ComputeError::Validation { violations, .. }) => assert_eq!(
                violations,
                vec![
                    "must have at least one config type",
                    "name cannot be blank",
                    "image cannot be blank",
                    "must have at least one scope",
                ]
            ),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn get_by_type_filters() {
        let f = setup();
        let mut general = environment_config("general", false, vec![]);
        general.config_types = [ConfigType::General].into();
        f.environments.create(general).unwrap();
        f.environments
            .create(environment_config("hub", false, vec![]))
            .unwrap();

        let hub = f.environments.get_by_type(ConfigType::JupyterHub).unwrap();
        assert_eq!(hub.len(), 1);
        assert_eq!(hub[0].compute_environment.name, "hub");
    }

    #[test]
    fn get_available_narrows_hardware_by_scope() {
        let f = setup();
        let open = f.hardware.create(hardware_config("open", open_scopes())).unwrap();
        let closed = f
            .hardware
            .create(hardware_config("closed", user_project_scopes("u2", "p1")))
            .unwrap();
        f.environments
            .create(environment_config("scipy", false, vec![open, closed]))
            .unwrap();
        let mut hidden = environment_config("hidden", false, vec![]);
        hidden.scopes = user_project_scopes("u2", "p1");
        f.environments.create(hidden).unwrap();

        let available = f
            .environments
            .get_available(Some(ConfigType::JupyterHub), &exec())
            .unwrap();

        assert_eq!(available.len(), 1);
        assert_eq!(
            names(&available[0].hardware_options.hardware_configs),
            vec!["open"]
        );
    }

    #[test]
    fn is_available_denies_missing_and_out_of_scope() {
        let f = setup();
        let mut config = environment_config("scipy", false, vec![]);
        config.scopes = user_project_scopes("u1", "p1");
        let env = f.environments.create(config).unwrap();

        assert!(f.environments.is_available(env.id.unwrap(), &exec()).unwrap());
        let other = ExecutionScope::new().user("u1").project("p2");
        assert!(!f.environments.is_available(env.id.unwrap(), &other).unwrap());
        assert!(!f.environments.is_available(ConfigId::new(77), &exec()).unwrap());
    }

    #[test]
    fn update_and_delete() {
        let f = setup();
        let small = f.hardware.create(hardware_config("small", open_scopes())).unwrap();
        let mut env = f
            .environments
            .create(environment_config("scipy", false, vec![]))
            .unwrap();

        env.hardware_options.hardware_configs = vec![small];
        let updated = f.environments.update(env.clone()).unwrap();
        assert_eq!(updated.hardware_options.hardware_configs.len(), 1);

        f.environments.delete(env.id.unwrap()).unwrap();
        assert!(matches!(
            f.environments.retrieve(env.id.unwrap()),
            Err(ComputeError::NotFound { .. })
        ));
        assert!(matches!(
            f.environments.delete(env.id.unwrap()),
            Err(ComputeError::NotFound { .. })
        ));
    }
}
