//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use xnat_jupyter_core::{ConfigId, UserId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{
    ComputeEnvironmentConfig, ConstraintConfig, DashboardConfig, DashboardFramework,
    HardwareConfig, UserOptions,
};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    sequence_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            sequence_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn put_record<T: serde::Serialize>(&self, cf_name: &str, id: ConfigId, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, keys::config_key(id), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        id: ConfigId,
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, keys::config_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_records<T: serde::de::DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;

        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize(&value)?);
        }

        Ok(records)
    }

    fn record_exists(&self, cf_name: &str, id: ConfigId) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self
            .db
            .get_pinned_cf(&cf, keys::config_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    fn delete_record(&self, cf_name: &str, id: ConfigId) -> Result<()> {
        if !self.record_exists(cf_name, id)? {
            return Err(StoreError::NotFound);
        }
        let cf = self.cf(cf_name)?;
        self.db
            .delete_cf(&cf, keys::config_key(id))
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Scan `owner || *` in an association column family.
    fn scan_links(&self, cf_name: &'static str, owner: ConfigId) -> Result<Vec<ConfigId>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::link_prefix(owner);

        let mut members = Vec::new();
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let member = keys::link_member(&key).ok_or_else(|| StoreError::CorruptKey {
                cf: cf_name,
                reason: format!("expected 16 bytes, got {}", key.len()),
            })?;
            members.push(member);
        }

        Ok(members)
    }

    /// Queue deletion of every link touching `owner` in both directions.
    fn unlink_all(
        &self,
        batch: &mut WriteBatch,
        forward_cf: &'static str,
        reverse_cf: &'static str,
        owner: ConfigId,
    ) -> Result<usize> {
        let forward = self.cf(forward_cf)?;
        let reverse = self.cf(reverse_cf)?;
        let members = self.scan_links(forward_cf, owner)?;
        for member in &members {
            batch.delete_cf(&forward, keys::link_key(owner, *member));
            batch.delete_cf(&reverse, keys::link_key(*member, owner));
        }
        Ok(members.len())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Sequences
    // =========================================================================

    fn next_id(&self, sequence: &str) -> Result<ConfigId> {
        let cf = self.cf(cf::SEQUENCES)?;
        let key = keys::sequence_key(sequence);

        let _guard = self.sequence_lock.lock();
        let current = self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| ConfigId::from_be_slice(&data))
            .transpose()
            .map_err(|e| StoreError::CorruptKey {
                cf: cf::SEQUENCES,
                reason: e.to_string(),
            })?
            .map_or(0, ConfigId::get);

        let next = ConfigId::new(current + 1);
        self.db
            .put_cf(&cf, &key, next.to_be_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(next)
    }

    // =========================================================================
    // Environment Config Operations
    // =========================================================================

    fn put_environment_config(
        &self,
        config: &ComputeEnvironmentConfig,
        hardware: &[ConfigId],
    ) -> Result<()> {
        let id = config.id.ok_or(StoreError::MissingId("environment config"))?;
        let cf_envs = self.cf(cf::ENVIRONMENT_CONFIGS)?;
        let cf_env_hw = self.cf(cf::ENVIRONMENT_HARDWARE)?;
        let cf_hw_env = self.cf(cf::HARDWARE_ENVIRONMENTS)?;

        let mut stored = config.clone();
        stored.hardware_options.hardware_configs.clear();
        let value = Self::serialize(&stored)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_envs, keys::config_key(id), &value);

        // Full rebuild: drop every existing link, then add the new set
        let removed =
            self.unlink_all(&mut batch, cf::ENVIRONMENT_HARDWARE, cf::HARDWARE_ENVIRONMENTS, id)?;
        for hw in hardware {
            batch.put_cf(&cf_env_hw, keys::link_key(id, *hw), []);
            batch.put_cf(&cf_hw_env, keys::link_key(*hw, id), []);
        }

        self.write(batch)?;

        tracing::debug!(
            environment_id = %id,
            removed,
            linked = hardware.len(),
            "Rebuilt environment hardware links"
        );
        Ok(())
    }

    fn get_environment_config(&self, id: ConfigId) -> Result<Option<ComputeEnvironmentConfig>> {
        self.get_record(cf::ENVIRONMENT_CONFIGS, id)
    }

    fn list_environment_configs(&self) -> Result<Vec<ComputeEnvironmentConfig>> {
        self.list_records(cf::ENVIRONMENT_CONFIGS)
    }

    fn delete_environment_config(&self, id: ConfigId) -> Result<()> {
        if !self.record_exists(cf::ENVIRONMENT_CONFIGS, id)? {
            return Err(StoreError::NotFound);
        }
        let cf_envs = self.cf(cf::ENVIRONMENT_CONFIGS)?;

        let mut batch = WriteBatch::default();
        self.unlink_all(&mut batch, cf::ENVIRONMENT_HARDWARE, cf::HARDWARE_ENVIRONMENTS, id)?;
        batch.delete_cf(&cf_envs, keys::config_key(id));

        self.write(batch)
    }

    // =========================================================================
    // Hardware Config Operations
    // =========================================================================

    fn put_hardware_config(
        &self,
        config: &HardwareConfig,
        join_environments: &[ConfigId],
    ) -> Result<()> {
        let id = config.id.ok_or(StoreError::MissingId("hardware config"))?;
        let cf_hw = self.cf(cf::HARDWARE_CONFIGS)?;
        let cf_env_hw = self.cf(cf::ENVIRONMENT_HARDWARE)?;
        let cf_hw_env = self.cf(cf::HARDWARE_ENVIRONMENTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_hw, keys::config_key(id), Self::serialize(config)?);
        for env in join_environments {
            batch.put_cf(&cf_env_hw, keys::link_key(*env, id), []);
            batch.put_cf(&cf_hw_env, keys::link_key(id, *env), []);
        }

        self.write(batch)
    }

    fn get_hardware_config(&self, id: ConfigId) -> Result<Option<HardwareConfig>> {
        self.get_record(cf::HARDWARE_CONFIGS, id)
    }

    fn list_hardware_configs(&self) -> Result<Vec<HardwareConfig>> {
        self.list_records(cf::HARDWARE_CONFIGS)
    }

    fn delete_hardware_config(&self, id: ConfigId) -> Result<()> {
        if !self.record_exists(cf::HARDWARE_CONFIGS, id)? {
            return Err(StoreError::NotFound);
        }
        let cf_hw = self.cf(cf::HARDWARE_CONFIGS)?;

        let mut batch = WriteBatch::default();
        let unlinked =
            self.unlink_all(&mut batch, cf::HARDWARE_ENVIRONMENTS, cf::ENVIRONMENT_HARDWARE, id)?;
        batch.delete_cf(&cf_hw, keys::config_key(id));

        self.write(batch)?;

        tracing::debug!(hardware_id = %id, unlinked, "Deleted hardware config");
        Ok(())
    }

    // =========================================================================
    // Association Operations
    // =========================================================================

    fn list_environment_hardware(&self, environment: ConfigId) -> Result<Vec<ConfigId>> {
        self.scan_links(cf::ENVIRONMENT_HARDWARE, environment)
    }

    fn list_hardware_environments(&self, hardware: ConfigId) -> Result<Vec<ConfigId>> {
        self.scan_links(cf::HARDWARE_ENVIRONMENTS, hardware)
    }

    // =========================================================================
    // Constraint Config Operations
    // =========================================================================

    fn put_constraint_config(&self, config: &ConstraintConfig) -> Result<()> {
        let id = config.id.ok_or(StoreError::MissingId("constraint config"))?;
        self.put_record(cf::CONSTRAINT_CONFIGS, id, config)
    }

    fn get_constraint_config(&self, id: ConfigId) -> Result<Option<ConstraintConfig>> {
        self.get_record(cf::CONSTRAINT_CONFIGS, id)
    }

    fn list_constraint_configs(&self) -> Result<Vec<ConstraintConfig>> {
        self.list_records(cf::CONSTRAINT_CONFIGS)
    }

    fn delete_constraint_config(&self, id: ConfigId) -> Result<()> {
        self.delete_record(cf::CONSTRAINT_CONFIGS, id)
    }

    // =========================================================================
    // Dashboard Operations
    // =========================================================================

    fn put_dashboard_framework(&self, framework: &DashboardFramework) -> Result<()> {
        let id = framework.id.ok_or(StoreError::MissingId("dashboard framework"))?;
        self.put_record(cf::DASHBOARD_FRAMEWORKS, id, framework)
    }

    fn get_dashboard_framework(&self, id: ConfigId) -> Result<Option<DashboardFramework>> {
        self.get_record(cf::DASHBOARD_FRAMEWORKS, id)
    }

    fn list_dashboard_frameworks(&self) -> Result<Vec<DashboardFramework>> {
        self.list_records(cf::DASHBOARD_FRAMEWORKS)
    }

    fn delete_dashboard_framework(&self, id: ConfigId) -> Result<()> {
        self.delete_record(cf::DASHBOARD_FRAMEWORKS, id)
    }

    fn put_dashboard_config(&self, config: &DashboardConfig) -> Result<()> {
        let id = config.id.ok_or(StoreError::MissingId("dashboard config"))?;
        self.put_record(cf::DASHBOARD_CONFIGS, id, config)
    }

    fn get_dashboard_config(&self, id: ConfigId) -> Result<Option<DashboardConfig>> {
        self.get_record(cf::DASHBOARD_CONFIGS, id)
    }

    fn list_dashboard_configs(&self) -> Result<Vec<DashboardConfig>> {
        self.list_records(cf::DASHBOARD_CONFIGS)
    }

    fn delete_dashboard_config(&self, id: ConfigId) -> Result<()> {
        self.delete_record(cf::DASHBOARD_CONFIGS, id)
    }

    // =========================================================================
    // User Options Operations
    // =========================================================================

    fn put_user_options(&self, options: &UserOptions) -> Result<()> {
        let cf = self.cf(cf::USER_OPTIONS)?;
        let key = keys::user_options_key(options.user_id, &options.servername);
        let value = Self::serialize(options)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_user_options(&self, user_id: UserId, servername: &str) -> Result<Option<UserOptions>> {
        let cf = self.cf(cf::USER_OPTIONS)?;
        let key = keys::user_options_key(user_id, servername);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn delete_user_options(&self, user_id: UserId, servername: &str) -> Result<()> {
        let cf = self.cf(cf::USER_OPTIONS)?;
        let key = keys::user_options_key(user_id, servername);

        let exists = self
            .db
            .get_pinned_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound);
        }

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
