//! `RocksDB` storage layer for xnat-jupyter.
//!
//! This crate persists compute configuration and per-server launch records using
//! `RocksDB` with column families for records and association indexes.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `environment_configs`, `hardware_configs`, `constraint_configs`,
//!   `dashboard_configs`, `dashboard_frameworks`: primary records keyed by id
//! - `environment_hardware` / `hardware_environments`: the two directions of the
//!   environment-to-hardware association, always written in the same batch
//! - `user_options`: launch records keyed by `(user_id, servername)`; the key itself
//!   is the uniqueness constraint, so a write is always an upsert
//! - `sequences`: id allocation
//!
//! # Example
//!
//! ```no_run
//! use xnat_jupyter_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/xnat-jupyter-db").unwrap();
//! let id = store.next_id("hardware_configs").unwrap();
//! assert!(store.get_hardware_config(id).unwrap().is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    BindMount, ComputeEnvironment, ComputeEnvironmentConfig, ConfigType, Constraint,
    ConstraintConfig, ConstraintOperator, ContainerSpec, Dashboard, DashboardConfig,
    DashboardFramework, EnvironmentVariable, GenericResource, Hardware, HardwareConfig,
    HardwareOptions, Mount, MountKind, Placement, Resources, TaskTemplate, UserOptions,
};

use xnat_jupyter_core::{ConfigId, UserId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so services can be generic over it.
pub trait Store: Send + Sync {
    // =========================================================================
    // Sequences
    // =========================================================================

    /// Allocate the next id from a named sequence. Ids start at 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_id(&self, sequence: &str) -> Result<ConfigId>;

    // =========================================================================
    // Environment Config Operations
    // =========================================================================

    /// Insert or update an environment config and replace its hardware links.
    ///
    /// The record and both association directions are written in one batch. The
    /// stored record never carries the request-side hardware list.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingId` if the config has no id.
    fn put_environment_config(
        &self,
        config: &ComputeEnvironmentConfig,
        hardware: &[ConfigId],
    ) -> Result<()>;

    /// Get an environment config by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_environment_config(&self, id: ConfigId) -> Result<Option<ComputeEnvironmentConfig>>;

    /// List all environment configs in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_environment_configs(&self) -> Result<Vec<ComputeEnvironmentConfig>>;

    /// Delete an environment config and all of its hardware links.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the config doesn't exist.
    fn delete_environment_config(&self, id: ConfigId) -> Result<()>;

    // =========================================================================
    // Hardware Config Operations
    // =========================================================================

    /// Insert or update a hardware config and link it into the given environments.
    ///
    /// Existing links are kept; `join_environments` only adds.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingId` if the config has no id.
    fn put_hardware_config(
        &self,
        config: &HardwareConfig,
        join_environments: &[ConfigId],
    ) -> Result<()>;

    /// Get a hardware config by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_hardware_config(&self, id: ConfigId) -> Result<Option<HardwareConfig>>;

    /// List all hardware configs in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_hardware_configs(&self) -> Result<Vec<HardwareConfig>>;

    /// Unlink a hardware config from every environment, then delete it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the config doesn't exist.
    fn delete_hardware_config(&self, id: ConfigId) -> Result<()>;

    // =========================================================================
    // Association Operations
    // =========================================================================

    /// Hardware ids linked to an environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_environment_hardware(&self, environment: ConfigId) -> Result<Vec<ConfigId>>;

    /// Environment ids a hardware config is linked into.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_hardware_environments(&self, hardware: ConfigId) -> Result<Vec<ConfigId>>;

    // =========================================================================
    // Constraint Config Operations
    // =========================================================================

    /// Insert or update a constraint config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingId` if the config has no id.
    fn put_constraint_config(&self, config: &ConstraintConfig) -> Result<()>;

    /// Get a constraint config by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_constraint_config(&self, id: ConfigId) -> Result<Option<ConstraintConfig>>;

    /// List all constraint configs in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_constraint_configs(&self) -> Result<Vec<ConstraintConfig>>;

    /// Delete a constraint config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the config doesn't exist.
    fn delete_constraint_config(&self, id: ConfigId) -> Result<()>;

    // =========================================================================
    // Dashboard Operations
    // =========================================================================

    /// Insert or update a dashboard framework.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingId` if the framework has no id.
    fn put_dashboard_framework(&self, framework: &DashboardFramework) -> Result<()>;

    /// Get a dashboard framework by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_dashboard_framework(&self, id: ConfigId) -> Result<Option<DashboardFramework>>;

    /// List all dashboard frameworks in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_dashboard_frameworks(&self) -> Result<Vec<DashboardFramework>>;

    /// Delete a dashboard framework.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the framework doesn't exist.
    fn delete_dashboard_framework(&self, id: ConfigId) -> Result<()>;

    /// Insert or update a dashboard config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingId` if the config has no id.
    fn put_dashboard_config(&self, config: &DashboardConfig) -> Result<()>;

    /// Get a dashboard config by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_dashboard_config(&self, id: ConfigId) -> Result<Option<DashboardConfig>>;

    /// List all dashboard configs in id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_dashboard_configs(&self) -> Result<Vec<DashboardConfig>>;

    /// Delete a dashboard config.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the config doesn't exist.
    fn delete_dashboard_config(&self, id: ConfigId) -> Result<()>;

    // =========================================================================
    // User Options Operations
    // =========================================================================

    /// Insert or replace the launch record for `(user_id, servername)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_user_options(&self, options: &UserOptions) -> Result<()>;

    /// Get the launch record for `(user_id, servername)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_user_options(&self, user_id: UserId, servername: &str) -> Result<Option<UserOptions>>;

    /// Delete the launch record for `(user_id, servername)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no record exists.
    fn delete_user_options(&self, user_id: UserId, servername: &str) -> Result<()>;
}
