//! Domain types stored in the database.
//!
//! These types represent the persisted compute configuration (environments,
//! hardware, constraints, dashboards) and the per-server launch record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xnat_jupyter_core::{ConfigId, ScopeMap, Scoped, UserId};

/// Which subsystems may use an environment config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigType {
    /// Jupyter notebook servers.
    #[serde(rename = "JUPYTERHUB")]
    JupyterHub,
    /// Container service launches.
    ContainerService,
    /// Anything else.
    General,
}

/// A single `KEY=value` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
}

impl EnvironmentVariable {
    /// Create a variable.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A mount declared by a compute environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Named volume; when empty the mount is a host bind of `local_path`.
    #[serde(default)]
    pub volume_name: String,
    /// Host path.
    #[serde(default)]
    pub local_path: String,
    /// Path inside the container.
    pub container_path: String,
    /// Whether the container sees the mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Container image and launch settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeEnvironment {
    /// Display name.
    pub name: String,
    /// Container image reference.
    pub image: String,
    /// Launch command, empty for the image default.
    #[serde(default)]
    pub command: String,
    /// Variables injected into the container.
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    /// Volumes and binds.
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

/// Which hardware an environment may run on.
///
/// `hardware_configs` is request-side input only: the persisted association
/// index is the source of truth and the list is rehydrated from it on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareOptions {
    /// Every existing hardware config is permitted.
    pub allow_all_hardware: bool,
    /// Explicitly permitted hardware configs.
    #[serde(default)]
    pub hardware_configs: Vec<HardwareConfig>,
}

/// An administrable container environment definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeEnvironmentConfig {
    /// Assigned on create.
    #[serde(default)]
    pub id: Option<ConfigId>,
    /// Subsystems this config applies to.
    #[serde(default)]
    pub config_types: BTreeSet<ConfigType>,
    /// Image and launch settings.
    pub compute_environment: ComputeEnvironment,
    /// Access rules.
    #[serde(default)]
    pub scopes: ScopeMap,
    /// Permitted hardware.
    #[serde(default)]
    pub hardware_options: HardwareOptions,
}

impl Scoped for ComputeEnvironmentConfig {
    fn scopes(&self) -> &ScopeMap {
        &self.scopes
    }
}

/// Placement constraint operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintOperator {
    /// Node attribute must equal one of the values.
    In,
    /// Node attribute must differ from every value.
    NotIn,
}

/// A scheduler placement constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Node attribute, e.g. `node.role`.
    pub key: String,
    /// Values compared against the attribute.
    pub values: BTreeSet<String>,
    /// Comparison operator.
    pub operator: ConstraintOperator,
}

impl Constraint {
    /// Render as scheduler placement expressions, one per value.
    ///
    /// ```
    /// use xnat_jupyter_store::{Constraint, ConstraintOperator};
    ///
    /// let c = Constraint {
    ///     key: "node.role".into(),
    ///     values: ["worker".to_string()].into(),
    ///     operator: ConstraintOperator::NotIn,
    /// };
    /// assert_eq!(c.to_list(), vec!["node.role!=worker"]);
    /// ```
    #[must_use]
    pub fn to_list(&self) -> Vec<String> {
        let op = match self.operator {
            ConstraintOperator::In => "==",
            ConstraintOperator::NotIn => "!=",
        };
        self.values
            .iter()
            .map(|value| format!("{}{op}{value}", self.key))
            .collect()
    }
}

/// A named generic resource such as a GPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericResource {
    /// Resource kind.
    pub name: String,
    /// Requested amount.
    pub value: String,
}

/// A hardware profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    /// Display name.
    pub name: String,
    /// CPU limit in cores.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// CPU reservation in cores.
    #[serde(default)]
    pub cpu_reservation: Option<f64>,
    /// Memory limit, e.g. `4G`.
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// Memory reservation.
    #[serde(default)]
    pub memory_reservation: Option<String>,
    /// Placement constraints carried by this profile.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Variables overriding environment variables of the same name.
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    /// Generic resources such as GPUs.
    #[serde(default)]
    pub generic_resources: Vec<GenericResource>,
}

/// An administrable hardware profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Assigned on create.
    #[serde(default)]
    pub id: Option<ConfigId>,
    /// The profile.
    pub hardware: Hardware,
    /// Access rules.
    #[serde(default)]
    pub scopes: ScopeMap,
}

impl Scoped for HardwareConfig {
    fn scopes(&self) -> &ScopeMap {
        &self.scopes
    }
}

/// An administrable placement constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    /// Assigned on create.
    #[serde(default)]
    pub id: Option<ConfigId>,
    /// The constraint.
    pub constraint: Constraint,
    /// Access rules; only Site and Project are required.
    #[serde(default)]
    pub scopes: ScopeMap,
}

impl Scoped for ConstraintConfig {
    fn scopes(&self) -> &ScopeMap {
        &self.scopes
    }
}

/// Command template for a dashboard framework such as Voila or Streamlit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardFramework {
    /// Assigned on create.
    #[serde(default)]
    pub id: Option<ConfigId>,
    /// Unique name referenced by dashboards.
    pub name: String,
    /// Command with `{repo}`, `{repobranch}` and `{mainFilePath}` placeholders.
    pub command_template: String,
}

/// A dashboard application definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    /// Display name.
    pub name: String,
    /// Description shown to users.
    #[serde(default)]
    pub description: String,
    /// Framework name, or blank/`custom` for a literal command.
    #[serde(default)]
    pub framework: String,
    /// Literal command used by custom dashboards.
    #[serde(default)]
    pub command: String,
    /// Where the dashboard sources come from, e.g. `git`.
    #[serde(default)]
    pub file_source: String,
    /// Repository URL.
    #[serde(default)]
    pub git_repo_url: String,
    /// Repository branch.
    #[serde(default)]
    pub git_repo_branch: String,
    /// Entry point within the repository.
    #[serde(default)]
    pub main_file_path: String,
}

/// A dashboard pinned to one environment and one hardware config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Assigned on create.
    #[serde(default)]
    pub id: Option<ConfigId>,
    /// The dashboard.
    pub dashboard: Dashboard,
    /// Access rules over Site, Project and `DataType`.
    #[serde(default)]
    pub scopes: ScopeMap,
    /// Pinned environment config.
    #[serde(default)]
    pub compute_environment_config_id: Option<ConfigId>,
    /// Pinned hardware config.
    #[serde(default)]
    pub hardware_config_id: Option<ConfigId>,
}

impl Scoped for DashboardConfig {
    fn scopes(&self) -> &ScopeMap {
        &self.scopes
    }
}

/// How a container mount is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    /// Host path bind.
    #[default]
    Bind,
    /// Named volume.
    Volume,
}

/// A mount as seen from XNAT, the container host and the notebook container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Mount name.
    pub name: String,
    /// Whether the notebook may write.
    pub writable: bool,
    /// Source path on the container host (after translation), or volume name.
    pub container_host_path: String,
    /// Source path as XNAT sees it.
    pub xnat_host_path: String,
    /// Target path inside the notebook container.
    pub jupyter_host_path: String,
    /// Backing kind.
    #[serde(default)]
    pub kind: MountKind,
}

/// Image, command, environment and mounts for the notebook container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image.
    pub image: String,
    /// Launch command, empty for the image default.
    #[serde(default)]
    pub command: String,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Mounts.
    #[serde(default)]
    pub mounts: Vec<BindMount>,
}

/// Resource limits and reservations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU limit in cores.
    pub cpu_limit: Option<f64>,
    /// CPU reservation in cores.
    pub cpu_reservation: Option<f64>,
    /// Memory limit.
    pub mem_limit: Option<String>,
    /// Memory reservation.
    pub mem_reservation: Option<String>,
    /// Generic resources by name.
    #[serde(default)]
    pub generic_resources: BTreeMap<String, String>,
}

/// Scheduler placement expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Expressions such as `node.role==worker`.
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// The launch description handed to the Hub spawner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Container settings.
    pub container_spec: ContainerSpec,
    /// Resource settings.
    pub resources: Resources,
    /// Placement settings.
    pub placement: Placement,
}

/// Launch record persisted per (user, servername).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOptions {
    /// Owning XNAT user.
    pub user_id: UserId,
    /// Hub server name, empty for the default server.
    pub servername: String,
    /// XNAT data type of the target item.
    pub xsi_type: String,
    /// Target item id.
    pub item_id: String,
    /// Project the item belongs to.
    pub project_id: String,
    /// Tracking id of the start request that produced this record.
    pub event_tracking_id: String,
    /// The resolved launch description.
    pub task_template: TaskTemplate,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(operator: ConstraintOperator) -> Constraint {
        Constraint {
            key: "node.instance.type".to_string(),
            values: ["gpu".to_string(), "cpu".to_string()].into(),
            operator,
        }
    }

    #[test]
    fn in_constraint_renders_equality_per_value() {
        assert_eq!(
            constraint(ConstraintOperator::In).to_list(),
            vec!["node.instance.type==cpu", "node.instance.type==gpu"]
        );
    }

    #[test]
    fn not_in_constraint_renders_inequality_per_value() {
        assert_eq!(
            constraint(ConstraintOperator::NotIn).to_list(),
            vec!["node.instance.type!=cpu", "node.instance.type!=gpu"]
        );
    }

    #[test]
    fn config_type_serde_names() {
        let json = serde_json::to_string(&ConfigType::JupyterHub).unwrap();
        assert_eq!(json, "\"JUPYTERHUB\"");
        let parsed: ConfigType = serde_json::from_str("\"CONTAINER_SERVICE\"").unwrap();
        assert_eq!(parsed, ConfigType::ContainerService);
    }
}
