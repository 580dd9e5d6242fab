//! Job template resolution.
//!
//! ```text
//!   is_available(exec, env, hw)
//!     = env scopes admit exec
//!     ∧ hw scopes admit exec
//!     ∧ (env.allow_all_hardware ∨ hw ∈ effective hardware of env)
//!
//!   resolve(exec, env, hw)
//!     = is_available? ──no──► Unavailable
//!            │
//!           yes
//!            ▼
//!     JobTemplate { env payload, hw payload, constraints available to exec }
//! ```
//!
//! The dashboard resolver replaces the environment/hardware scope checks with
//! the dashboard config's own scopes plus a check that the caller's ids match
//! the dashboard's pinned ids, then overrides the launch command.

use std::sync::Arc;

use xnat_jupyter_core::{ConfigId, ExecutionScope, DASHBOARD_SCOPES};
use xnat_jupyter_store::Store;

use crate::constraint::ConstraintConfigService;
use crate::dashboard::{DashboardConfigService, DashboardFrameworkService};
use crate::environment::ComputeEnvironmentConfigService;
use crate::error::{ComputeError, Result};
use crate::hardware::HardwareConfigService;
use crate::template::JobTemplate;

/// Authorizes and builds job templates.
pub trait JobTemplateResolver: Send + Sync {
    /// Whether `execution` may run the environment on the hardware.
    ///
    /// Missing configs are reported as unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn is_available(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<bool>;

    /// Build a template, re-checking availability first.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Unavailable` if the pair is not available.
    fn resolve(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate>;
}

/// Resolution through a dashboard config.
pub trait DashboardTemplateResolver: JobTemplateResolver {
    /// Whether `execution` may launch the dashboard with the given pair.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::InvalidReference` if the dashboard has no pins or
    /// the ids differ from its pins.
    fn is_dashboard_available(
        &self,
        execution: &ExecutionScope,
        dashboard: ConfigId,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<bool>;

    /// Build a template for the dashboard with its command applied.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Unavailable` if the dashboard is not available and
    /// `ComputeError::InvalidReference` if the ids differ from its pins.
    fn resolve_dashboard(
        &self,
        execution: &ExecutionScope,
        dashboard: ConfigId,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate>;
}

/// Scope-checked resolution over environment, hardware and constraint configs.
pub struct DefaultJobTemplateResolver<S: Store> {
    environments: ComputeEnvironmentConfigService<S>,
    hardware: HardwareConfigService<S>,
    constraints: ConstraintConfigService<S>,
}

impl<S: Store> Clone for DefaultJobTemplateResolver<S> {
    fn clone(&self) -> Self {
        Self {
            environments: self.environments.clone(),
            hardware: self.hardware.clone(),
            constraints: self.constraints.clone(),
        }
    }
}

impl<S: Store> DefaultJobTemplateResolver<S> {
    /// Create a resolver over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            environments: ComputeEnvironmentConfigService::new(Arc::clone(&store)),
            hardware: HardwareConfigService::new(Arc::clone(&store)),
            constraints: ConstraintConfigService::new(store),
        }
    }

    /// Whether `hardware` is in the environment's effective hardware set.
    fn in_pool(&self, environment: ConfigId, hardware: ConfigId) -> Result<bool> {
        let config = match self.environments.retrieve(environment) {
            Ok(config) => config,
            Err(ComputeError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(self
            .environments
            .associations()
            .effective_hardware_ids(&config)?
            .contains(&hardware))
    }

    /// Assemble a template without any availability check.
    fn build(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate> {
        let compute_environment = self.environments.retrieve(environment)?.compute_environment;
        let hardware = self.hardware.retrieve(hardware)?.hardware;
        let constraints = self
            .constraints
            .get_available(execution)?
            .into_iter()
            .map(|config| config.constraint)
            .collect();

        Ok(JobTemplate {
            compute_environment,
            hardware,
            constraints,
        })
    }
}

impl<S: Store> JobTemplateResolver for DefaultJobTemplateResolver<S> {
    fn is_available(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<bool> {
        Ok(self.environments.is_available(environment, execution)?
            && self.hardware.is_available(hardware, execution)?
            && self.in_pool(environment, hardware)?)
    }

    fn resolve(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate> {
        if !self.is_available(execution, environment, hardware)? {
            return Err(ComputeError::Unavailable(format!(
                "compute environment config {environment} with hardware config {hardware} \
                 is not available"
            )));
        }
        let template = self.build(execution, environment, hardware)?;
        tracing::debug!(
            environment_id = %environment,
            hardware_id = %hardware,
            constraints = template.constraints.len(),
            "Resolved job template"
        );
        Ok(template)
    }
}

/// Resolution for dashboards, which pin their own environment and hardware.
pub struct DashboardJobTemplateResolver<S: Store> {
    base: DefaultJobTemplateResolver<S>,
    dashboards: DashboardConfigService<S>,
    frameworks: DashboardFrameworkService<S>,
}

impl<S: Store> Clone for DashboardJobTemplateResolver<S> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            dashboards: self.dashboards.clone(),
            frameworks: self.frameworks.clone(),
        }
    }
}

impl<S: Store> DashboardJobTemplateResolver<S> {
    /// Create a dashboard resolver over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            base: DefaultJobTemplateResolver::new(Arc::clone(&store)),
            dashboards: DashboardConfigService::new(Arc::clone(&store)),
            frameworks: DashboardFrameworkService::new(store),
        }
    }
}

impl<S: Store> JobTemplateResolver for DashboardJobTemplateResolver<S> {
    /// Always true: dashboards are authorized by their own scopes, not the pair's.
    fn is_available(
        &self,
        _execution: &ExecutionScope,
        _environment: ConfigId,
        _hardware: ConfigId,
    ) -> Result<bool> {
        Ok(true)
    }

    fn resolve(
        &self,
        execution: &ExecutionScope,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate> {
        self.base.build(execution, environment, hardware)
    }
}

impl<S: Store> DashboardTemplateResolver for DashboardJobTemplateResolver<S> {
    fn is_dashboard_available(
        &self,
        execution: &ExecutionScope,
        dashboard: ConfigId,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<bool> {
        let config = match self.dashboards.retrieve(dashboard) {
            Ok(config) => config,
            Err(ComputeError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !DASHBOARD_SCOPES.is_available(&config, execution) {
            return Ok(false);
        }

        let (Some(pinned_env), Some(pinned_hw)) =
            (config.compute_environment_config_id, config.hardware_config_id)
        else {
            return Err(ComputeError::InvalidReference(format!(
                "dashboard config {dashboard} has no pinned environment or hardware"
            )));
        };
        if pinned_env != environment || pinned_hw != hardware {
            return Err(ComputeError::InvalidReference(format!(
                "dashboard config {dashboard} pins environment {pinned_env} and hardware \
                 {pinned_hw}, got {environment} and {hardware}"
            )));
        }

        self.base.in_pool(environment, hardware)
    }

    fn resolve_dashboard(
        &self,
        execution: &ExecutionScope,
        dashboard: ConfigId,
        environment: ConfigId,
        hardware: ConfigId,
    ) -> Result<JobTemplate> {
        if !self.is_dashboard_available(execution, dashboard, environment, hardware)? {
            return Err(ComputeError::Unavailable(format!(
                "dashboard config {dashboard} is not available"
            )));
        }

        let config = self.dashboards.retrieve(dashboard)?;
        let mut template = self.resolve(execution, environment, hardware)?;
        let command = self.frameworks.resolve_command(&config.dashboard)?;
        if !command.trim().is_empty() {
            template.compute_environment.command = command;
        }

        tracing::debug!(
            dashboard_id = %dashboard,
            command = %template.compute_environment.command,
            "Resolved dashboard job template"
        );
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        constraint_config, dashboard_config, environment_config, framework, hardware_config,
        open_scopes, user_project_scopes,
    };
    use tempfile::TempDir;
    use xnat_jupyter_core::{scope_map, Scope, ScopeSetting};
    use xnat_jupyter_store::RocksStore;

    struct Fixture {
        store: Arc<RocksStore>,
        resolver: DefaultJobTemplateResolver<RocksStore>,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        Fixture {
            resolver: DefaultJobTemplateResolver::new(Arc::clone(&store)),
            store,
            _dir: dir,
        }
    }

    fn u1_p1() -> ExecutionScope {
        ExecutionScope::new().user("u1").project("p1")
    }

    impl Fixture {
        fn hardware(&self, name: &str) -> xnat_jupyter_store::HardwareConfig {
            HardwareConfigService::new(Arc::clone(&self.store))
                .create(hardware_config(name, open_scopes()))
                .unwrap()
        }

        fn environment(
            &self,
            allow_all: bool,
            listed: Vec<xnat_jupyter_store::HardwareConfig>,
        ) -> ConfigId {
            ComputeEnvironmentConfigService::new(Arc::clone(&self.store))
                .create(environment_config("scipy", allow_all, listed))
                .unwrap()
                .id
                .unwrap()
        }
    }

    #[test]
    fn explicit_pool_membership_decides() {
        let f = setup();
        let hw1 = f.hardware("hw1");
        let hw2 = f.hardware("hw2");
        let env = f.environment(false, vec![hw1.clone()]);

        let result = f.resolver.resolve(&u1_p1(), env, hw2.id.unwrap());
        assert!(matches!(result, Err(ComputeError::Unavailable(_))));

        let template = f.resolver.resolve(&u1_p1(), env, hw1.id.unwrap()).unwrap();
        assert_eq!(template.hardware, hw1.hardware);
    }

    #[test]
    fn allow_all_accepts_any_existing_hardware() {
        let f = setup();
        let env = f.environment(true, vec![]);
        let hw = f.hardware("late");

        assert!(f.resolver.resolve(&u1_p1(), env, hw.id.unwrap()).is_ok());
        assert!(!f
            .resolver
            .is_available(&u1_p1(), env, ConfigId::new(404))
            .unwrap());
    }

    #[test]
    fn every_dimension_gates_availability() {
        let f = setup();
        let hw = f.hardware("hw");
        let hw_id = hw.id.unwrap();
        let service = ComputeEnvironmentConfigService::new(Arc::clone(&f.store));
        let mut config = environment_config("scipy", false, vec![hw]);
        config.scopes = user_project_scopes("u1", "p1");
        let mut env = service.create(config).unwrap();
        let env_id = env.id.unwrap();

        assert!(f.resolver.is_available(&u1_p1(), env_id, hw_id).unwrap());

        env.scopes = user_project_scopes("u2", "p1");
        service.update(env).unwrap();
        assert!(!f.resolver.is_available(&u1_p1(), env_id, hw_id).unwrap());
    }

    #[test]
    fn hardware_scope_gates_availability() {
        let f = setup();
        let hw = HardwareConfigService::new(Arc::clone(&f.store))
            .create(hardware_config("private", user_project_scopes("u2", "p1")))
            .unwrap();
        let env = f.environment(true, vec![]);

        assert!(!f.resolver.is_available(&u1_p1(), env, hw.id.unwrap()).unwrap());
    }

    #[test]
    fn constraints_are_concatenated_without_dedup() {
        let f = setup();
        let constraints = ConstraintConfigService::new(Arc::clone(&f.store));
        constraints
            .create(constraint_config("node.role", &["worker"], None))
            .unwrap();
        constraints
            .create(constraint_config("node.role", &["worker"], None))
            .unwrap();
        constraints
            .create(constraint_config("node.labels.gpu", &["true"], Some("p9")))
            .unwrap();
        let hw = f.hardware("hw");
        let env = f.environment(false, vec![hw.clone()]);

        let template = f.resolver.resolve(&u1_p1(), env, hw.id.unwrap()).unwrap();
        assert_eq!(template.constraints.len(), 2);
        assert_eq!(template.constraints[0], template.constraints[1]);
    }

    type DashboardFixture = (
        Fixture,
        DashboardJobTemplateResolver<RocksStore>,
        ConfigId,
        ConfigId,
        ConfigId,
    );

    fn dashboard_setup() -> DashboardFixture {
        let f = setup();
        let hw = f.hardware("small");
        let hw_id = hw.id.unwrap();
        let service = ComputeEnvironmentConfigService::new(Arc::clone(&f.store));
        // Closed to everyone, so only the dashboard path can launch it
        let mut config = environment_config("voila", false, vec![hw]);
        config.scopes = user_project_scopes("nobody", "nowhere");
        let env_id = service.create(config).unwrap().id.unwrap();

        let dashboards = DashboardConfigService::new(Arc::clone(&f.store));
        dashboards
            .frameworks()
            .create(framework("Voila", "voila {mainFilePath}  --no-browser"))
            .unwrap();
        let mut dashboard = dashboard_config("qc", env_id, hw_id);
        dashboard.dashboard.framework = "Voila".into();
        dashboard.dashboard.main_file_path = "qc.ipynb".into();
        dashboard.scopes = scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::restricted(Scope::Project, ["p1"]),
            ScopeSetting::restricted(Scope::DataType, ["xnat:projectData"]),
        ]);
        let dashboard_id = dashboards.create(dashboard).unwrap().id.unwrap();

        let resolver = DashboardJobTemplateResolver::new(Arc::clone(&f.store));
        (f, resolver, dashboard_id, env_id, hw_id)
    }

    #[test]
    fn dashboard_bypasses_pair_scopes() {
        let (f, resolver, dashboard, env, hw) = dashboard_setup();
        let exec = u1_p1().data_type("xnat:projectData");

        assert!(!f.resolver.is_available(&exec, env, hw).unwrap());
        assert!(resolver.is_available(&exec, env, hw).unwrap());
        assert!(resolver.is_dashboard_available(&exec, dashboard, env, hw).unwrap());

        let template = resolver.resolve_dashboard(&exec, dashboard, env, hw).unwrap();
        assert_eq!(template.compute_environment.command, "voila qc.ipynb --no-browser");
    }

    #[test]
    fn dashboard_scopes_still_apply() {
        let (_f, resolver, dashboard, env, hw) = dashboard_setup();
        let wrong_type = u1_p1().data_type("xnat:mrSessionData");

        assert!(!resolver.is_dashboard_available(&wrong_type, dashboard, env, hw).unwrap());
        assert!(matches!(
            resolver.resolve_dashboard(&wrong_type, dashboard, env, hw),
            Err(ComputeError::Unavailable(_))
        ));
    }

    #[test]
    fn dashboard_pin_mismatch_is_hard_failure() {
        let (f, resolver, dashboard, env, _hw) = dashboard_setup();
        let other_hw = f.hardware("other").id.unwrap();
        let exec = u1_p1().data_type("xnat:projectData");

        assert!(matches!(
            resolver.is_dashboard_available(&exec, dashboard, env, other_hw),
            Err(ComputeError::InvalidReference(_))
        ));
    }
}
