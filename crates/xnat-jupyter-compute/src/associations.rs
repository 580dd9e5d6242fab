//! Environment-to-hardware association bookkeeping.
//!
//! Associations are never edited directly; they change as a side effect of
//! saving or deleting configs:
//!
//! ```text
//!   save environment ──► clear all links ──► allow_all? ──yes──► link every hardware
//!                                                │
//!                                                no
//!                                                ▼
//!                                  link listed ids that exist (others skipped)
//!
//!   save hardware ─────► join every environment with allow_all_hardware
//!   delete hardware ───► unlink from every environment, then delete
//!   delete environment ► unlink all hardware, then delete
//! ```
//!
//! Each of these is a single storage batch. Two concurrent saves that touch the
//! same hardware rely on the store's write isolation; no extra locking is applied.

use std::collections::BTreeSet;
use std::sync::Arc;

use xnat_jupyter_core::ConfigId;
use xnat_jupyter_store::{ComputeEnvironmentConfig, HardwareConfig, HardwareOptions, Store};

use crate::error::Result;

/// Maintains the many-to-many link between environments and hardware.
pub struct HardwareAssociationManager<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for HardwareAssociationManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> HardwareAssociationManager<S> {
    /// Create a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Hardware ids an environment with these options should link to.
    ///
    /// Listed entries without an id, or whose id does not resolve, are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn resolve_links(&self, options: &HardwareOptions) -> Result<Vec<ConfigId>> {
        if options.allow_all_hardware {
            return self.all_hardware_ids();
        }

        let mut links = BTreeSet::new();
        for listed in &options.hardware_configs {
            let Some(id) = listed.id else {
                tracing::debug!(name = %listed.hardware.name, "Skipping hardware without id");
                continue;
            };
            if self.store.get_hardware_config(id)?.is_some() {
                links.insert(id);
            } else {
                tracing::debug!(hardware_id = %id, "Skipping unknown hardware");
            }
        }
        Ok(links.into_iter().collect())
    }

    /// Persist an environment config, rebuilding its links from scratch.
    ///
    /// Returns the linked hardware ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub fn save_environment(&self, config: &ComputeEnvironmentConfig) -> Result<Vec<ConfigId>> {
        let links = self.resolve_links(&config.hardware_options)?;
        self.store.put_environment_config(config, &links)?;
        Ok(links)
    }

    /// Persist a hardware config and add it to every open pool.
    ///
    /// Returns the ids of the environments it joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails.
    pub fn save_hardware(&self, config: &HardwareConfig) -> Result<Vec<ConfigId>> {
        let open_pools: Vec<ConfigId> = self
            .store
            .list_environment_configs()?
            .into_iter()
            .filter(|env| env.hardware_options.allow_all_hardware)
            .filter_map(|env| env.id)
            .collect();

        self.store.put_hardware_config(config, &open_pools)?;
        Ok(open_pools)
    }

    /// Unlink a hardware config from every environment and delete it.
    ///
    /// Returns the ids of the environments it was removed from.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails, including
    /// `StoreError::NotFound` when the hardware does not exist.
    pub fn delete_hardware(&self, id: ConfigId) -> Result<Vec<ConfigId>> {
        let parents = self.store.list_hardware_environments(id)?;
        self.store.delete_hardware_config(id)?;
        Ok(parents)
    }

    /// Unlink all hardware from an environment and delete it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store operation fails, including
    /// `StoreError::NotFound` when the environment does not exist.
    pub fn delete_environment(&self, id: ConfigId) -> Result<()> {
        self.store.delete_environment_config(id)?;
        Ok(())
    }

    /// Ids of the hardware an environment may use.
    ///
    /// With `allow_all_hardware` this is every existing hardware config,
    /// whatever the stored links say.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn effective_hardware_ids(
        &self,
        config: &ComputeEnvironmentConfig,
    ) -> Result<BTreeSet<ConfigId>> {
        if config.hardware_options.allow_all_hardware {
            return Ok(self.all_hardware_ids()?.into_iter().collect());
        }
        match config.id {
            Some(id) => Ok(self.store.list_environment_hardware(id)?.into_iter().collect()),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Fill the request-side hardware list from the effective set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn hydrate(&self, mut config: ComputeEnvironmentConfig) -> Result<ComputeEnvironmentConfig> {
        let mut hardware = Vec::new();
        for id in self.effective_hardware_ids(&config)? {
            if let Some(hw) = self.store.get_hardware_config(id)? {
                hardware.push(hw);
            }
        }
        config.hardware_options.hardware_configs = hardware;
        Ok(config)
    }

    fn all_hardware_ids(&self) -> Result<Vec<ConfigId>> {
        Ok(self
            .store
            .list_hardware_configs()?
            .into_iter()
            .filter_map(|hw| hw.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnat_jupyter_store::{ComputeEnvironment, Hardware, RocksStore};
    use tempfile::TempDir;

    fn setup() -> (HardwareAssociationManager<RocksStore>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (HardwareAssociationManager::new(Arc::clone(&store)), store, dir)
    }

    fn hardware(id: u64) -> HardwareConfig {
        HardwareConfig {
            id: Some(ConfigId::new(id)),
            hardware: Hardware {
                name: format!("hw-{id}"),
                ..Hardware::default()
            },
            ..HardwareConfig::default()
        }
    }

    fn environment(id: u64, allow_all: bool, listed: Vec<HardwareConfig>) -> ComputeEnvironmentConfig {
        ComputeEnvironmentConfig {
            id: Some(ConfigId::new(id)),
            compute_environment: ComputeEnvironment {
                name: format!("env-{id}"),
                image: "jupyter/base-notebook".to_string(),
                ..ComputeEnvironment::default()
            },
            hardware_options: HardwareOptions {
                allow_all_hardware: allow_all,
                hardware_configs: listed,
            },
            ..ComputeEnvironmentConfig::default()
        }
    }

    fn set(raw: &[u64]) -> BTreeSet<ConfigId> {
        raw.iter().copied().map(ConfigId::new).collect()
    }

    #[test]
    fn allow_all_links_every_hardware() {
        let (manager, _store, _dir) = setup();
        manager.save_hardware(&hardware(1)).unwrap();
        manager.save_hardware(&hardware(2)).unwrap();

        let env = environment(10, true, vec![]);
        let links = manager.save_environment(&env).unwrap();

        assert_eq!(links, vec![ConfigId::new(1), ConfigId::new(2)]);
    }

    #[test]
    fn listed_links_skip_unknown_and_idless_entries() {
        let (manager, store, _dir) = setup();
        manager.save_hardware(&hardware(1)).unwrap();

        let mut idless = hardware(0);
        idless.id = None;
        let env = environment(10, false, vec![hardware(1), hardware(99), idless]);
        let links = manager.save_environment(&env).unwrap();

        assert_eq!(links, vec![ConfigId::new(1)]);
        assert_eq!(store.list_environment_hardware(ConfigId::new(10)).unwrap(), links);
    }

    #[test]
    fn update_rebuilds_links() {
        let (manager, store, _dir) = setup();
        manager.save_hardware(&hardware(1)).unwrap();
        manager.save_hardware(&hardware(2)).unwrap();
        manager
            .save_environment(&environment(10, false, vec![hardware(1)]))
            .unwrap();

        manager
            .save_environment(&environment(10, false, vec![hardware(2)]))
            .unwrap();

        assert_eq!(
            store.list_environment_hardware(ConfigId::new(10)).unwrap(),
            vec![ConfigId::new(2)]
        );
        assert!(store.list_hardware_environments(ConfigId::new(1)).unwrap().is_empty());
    }

    #[test]
    fn new_hardware_joins_every_open_pool() {
        let (manager, store, _dir) = setup();
        for id in 10..13 {
            manager.save_environment(&environment(id, true, vec![])).unwrap();
        }
        manager.save_environment(&environment(20, false, vec![])).unwrap();

        let joined = manager.save_hardware(&hardware(1)).unwrap();

        assert_eq!(joined.len(), 3);
        for id in 10..13 {
            assert_eq!(
                store.list_environment_hardware(ConfigId::new(id)).unwrap(),
                vec![ConfigId::new(1)]
            );
        }
        assert!(store.list_environment_hardware(ConfigId::new(20)).unwrap().is_empty());
    }

    #[test]
    fn deleting_hardware_shrinks_each_parent_by_at_most_one() {
        let (manager, store, _dir) = setup();
        manager.save_hardware(&hardware(1)).unwrap();
        manager.save_hardware(&hardware(2)).unwrap();
        manager
            .save_environment(&environment(10, false, vec![hardware(1), hardware(2)]))
            .unwrap();
        manager
            .save_environment(&environment(11, false, vec![hardware(2)]))
            .unwrap();

        let parents = manager.delete_hardware(ConfigId::new(1)).unwrap();

        assert_eq!(parents, vec![ConfigId::new(10)]);
        assert_eq!(store.list_environment_hardware(ConfigId::new(10)).unwrap().len(), 1);
        assert_eq!(store.list_environment_hardware(ConfigId::new(11)).unwrap().len(), 1);
    }

    #[test]
    fn allow_all_effective_set_ignores_stored_links() {
        let (manager, store, _dir) = setup();
        let env = environment(10, true, vec![]);
        manager.save_environment(&env).unwrap();
        // Written behind the manager's back, so no link exists
        store.put_hardware_config(&hardware(5), &[]).unwrap();

        assert_eq!(manager.effective_hardware_ids(&env).unwrap(), set(&[5]));
    }

    #[test]
    fn hydrate_fills_request_side_list() {
        let (manager, store, _dir) = setup();
        manager.save_hardware(&hardware(1)).unwrap();
        manager
            .save_environment(&environment(10, false, vec![hardware(1)]))
            .unwrap();

        let stored = store.get_environment_config(ConfigId::new(10)).unwrap().unwrap();
        assert!(stored.hardware_options.hardware_configs.is_empty());

        let hydrated = manager.hydrate(stored).unwrap();
        assert_eq!(hydrated.hardware_options.hardware_configs, vec![hardware(1)]);
    }
}
