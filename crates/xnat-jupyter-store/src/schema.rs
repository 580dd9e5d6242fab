//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Compute environment configs, keyed by `config_id`.
    pub const ENVIRONMENT_CONFIGS: &str = "environment_configs";

    /// Hardware configs, keyed by `config_id`.
    pub const HARDWARE_CONFIGS: &str = "hardware_configs";

    /// Constraint configs, keyed by `config_id`.
    pub const CONSTRAINT_CONFIGS: &str = "constraint_configs";

    /// Dashboard configs, keyed by `config_id`.
    pub const DASHBOARD_CONFIGS: &str = "dashboard_configs";

    /// Dashboard frameworks, keyed by `config_id`.
    pub const DASHBOARD_FRAMEWORKS: &str = "dashboard_frameworks";

    /// Index: hardware permitted per environment, keyed by `env_id || hardware_id`.
    pub const ENVIRONMENT_HARDWARE: &str = "environment_hardware";

    /// Index: environments per hardware, keyed by `hardware_id || env_id`.
    pub const HARDWARE_ENVIRONMENTS: &str = "hardware_environments";

    /// Launch records, keyed by `user_id || servername`.
    pub const USER_OPTIONS: &str = "user_options";

    /// Id sequences, keyed by sequence name.
    pub const SEQUENCES: &str = "sequences";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ENVIRONMENT_CONFIGS,
        cf::HARDWARE_CONFIGS,
        cf::CONSTRAINT_CONFIGS,
        cf::DASHBOARD_CONFIGS,
        cf::DASHBOARD_FRAMEWORKS,
        cf::ENVIRONMENT_HARDWARE,
        cf::HARDWARE_ENVIRONMENTS,
        cf::USER_OPTIONS,
        cf::SEQUENCES,
    ]
}
