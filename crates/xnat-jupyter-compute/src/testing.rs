//! Config fixtures shared by tests in this and downstream crates.

use xnat_jupyter_core::{scope_map, ConfigId, Scope, ScopeMap, ScopeSetting};
use xnat_jupyter_store::{
    ComputeEnvironment, ComputeEnvironmentConfig, ConfigType, Constraint, ConstraintConfig,
    ConstraintOperator, Dashboard, DashboardConfig, DashboardFramework, Hardware, HardwareConfig,
    HardwareOptions,
};

/// Every dimension open.
#[must_use]
pub fn open_scopes() -> ScopeMap {
    scope_map(Scope::ALL.map(ScopeSetting::open))
}

/// Site open; user and project restricted to one value each.
#[must_use]
pub fn user_project_scopes(user: &str, project: &str) -> ScopeMap {
    scope_map([
        ScopeSetting::open(Scope::Site),
        ScopeSetting::restricted(Scope::User, [user]),
        ScopeSetting::restricted(Scope::Project, [project]),
    ])
}

/// A named hardware profile with two cores and 4G of memory.
#[must_use]
pub fn hardware_config(name: &str, scopes: ScopeMap) -> HardwareConfig {
    HardwareConfig {
        id: None,
        hardware: Hardware {
            name: name.to_string(),
            cpu_limit: Some(2.0),
            memory_limit: Some("4G".to_string()),
            ..Hardware::default()
        },
        scopes,
    }
}

/// A `JupyterHub` environment open to everyone.
#[must_use]
pub fn environment_config(
    name: &str,
    allow_all_hardware: bool,
    hardware_configs: Vec<HardwareConfig>,
) -> ComputeEnvironmentConfig {
    ComputeEnvironmentConfig {
        id: None,
        config_types: [ConfigType::JupyterHub].into(),
        compute_environment: ComputeEnvironment {
            name: name.to_string(),
            image: "jupyter/scipy-notebook:hub-3.0.0".to_string(),
            ..ComputeEnvironment::default()
        },
        scopes: open_scopes(),
        hardware_options: HardwareOptions {
            allow_all_hardware,
            hardware_configs,
        },
    }
}

/// An `In` constraint, open site-wide or restricted to one project.
#[must_use]
pub fn constraint_config(key: &str, values: &[&str], project: Option<&str>) -> ConstraintConfig {
    let project_scope = match project {
        Some(project) => ScopeSetting::restricted(Scope::Project, [project]),
        None => ScopeSetting::open(Scope::Project),
    };
    ConstraintConfig {
        id: None,
        constraint: Constraint {
            key: key.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
            operator: ConstraintOperator::In,
        },
        scopes: scope_map([ScopeSetting::open(Scope::Site), project_scope]),
    }
}

/// A framework with the given command template.
#[must_use]
pub fn framework(name: &str, command_template: &str) -> DashboardFramework {
    DashboardFramework {
        id: None,
        name: name.to_string(),
        command_template: command_template.to_string(),
    }
}

/// A custom-command dashboard open on site and data type, with an empty project
/// allow-list.
#[must_use]
pub fn dashboard_config(name: &str, environment: ConfigId, hardware: ConfigId) -> DashboardConfig {
    DashboardConfig {
        id: None,
        dashboard: Dashboard {
            name: name.to_string(),
            framework: String::new(),
            command: "voila app.ipynb".to_string(),
            ..Dashboard::default()
        },
        scopes: scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::restricted(Scope::Project, Vec::<String>::new()),
            ScopeSetting::open(Scope::DataType),
        ]),
        compute_environment_config_id: Some(environment),
        hardware_config_id: Some(hardware),
    }
}
