//! Dashboard frameworks and dashboard configs.
//!
//! A dashboard config pins one environment config and one hardware config and
//! carries its own Site/Project/DataType scopes. Its launch command comes from
//! either a literal custom command or a named framework's template.

use std::sync::Arc;

use xnat_jupyter_core::{
    ConfigId, ExecutionScope, Scope, ScopeSetting, DASHBOARD_SCOPES,
};
use xnat_jupyter_store::{Dashboard, DashboardConfig, DashboardFramework, Store};

use crate::error::{ComputeError, Result};
use crate::guard::ConfigDeleter;
use crate::validation::Violations;

const FRAMEWORK_KIND: &str = "dashboard framework";
const FRAMEWORK_SEQUENCE: &str = "dashboard_frameworks";
const CONFIG_KIND: &str = "dashboard config";
const CONFIG_SEQUENCE: &str = "dashboard_configs";

/// Framework name meaning "use the dashboard's literal command".
pub const CUSTOM_FRAMEWORK: &str = "custom";

/// Whether a dashboard uses its own command rather than a framework template.
#[must_use]
pub fn is_custom_framework(framework: &str) -> bool {
    let framework = framework.trim();
    framework.is_empty() || framework.eq_ignore_ascii_case(CUSTOM_FRAMEWORK)
}

/// Replace every run of whitespace with a single space.
fn collapse_whitespace(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut in_space = false;
    for c in command.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Dashboard framework administration and command resolution.
pub struct DashboardFrameworkService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for DashboardFrameworkService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> DashboardFrameworkService<S> {
    /// Create a new framework service.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Get a framework by id.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    pub fn retrieve(&self, id: ConfigId) -> Result<DashboardFramework> {
        self.store
            .get_dashboard_framework(id)?
            .ok_or_else(|| ComputeError::not_found(FRAMEWORK_KIND, id))
    }

    /// Look up a framework by name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_by_name(&self, name: &str) -> Result<Option<DashboardFramework>> {
        Ok(self
            .store
            .list_dashboard_frameworks()?
            .into_iter()
            .find(|framework| framework.name.eq_ignore_ascii_case(name.trim())))
    }

    /// All frameworks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self) -> Result<Vec<DashboardFramework>> {
        Ok(self.store.list_dashboard_frameworks()?)
    }

    /// Create a framework. Names are unique.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` for a blank name or template and
    /// `ComputeError::Conflict` when the name is taken.
    pub fn create(&self, mut framework: DashboardFramework) -> Result<DashboardFramework> {
        Self::validate(&framework)?;
        if self.get_by_name(&framework.name)?.is_some() {
            return Err(ComputeError::Conflict(format!(
                "dashboard framework {} already exists",
                framework.name
            )));
        }
        let id = self.store.next_id(FRAMEWORK_SEQUENCE)?;
        framework.id = Some(id);
        self.store.put_dashboard_framework(&framework)?;
        tracing::info!(framework_id = %id, name = %framework.name, "Created dashboard framework");
        Ok(framework)
    }

    /// Replace an existing framework.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` when no framework has this id and
    /// `ComputeError::Conflict` when the new name belongs to another framework.
    pub fn update(&self, framework: DashboardFramework) -> Result<DashboardFramework> {
        let Some(id) = framework.id else {
            return Err(ComputeError::Validation {
                kind: FRAMEWORK_KIND,
                violations: vec!["id is required to update".to_string()],
            });
        };
        Self::validate(&framework)?;
        self.retrieve(id)?;
        if let Some(existing) = self.get_by_name(&framework.name)? {
            if existing.id != Some(id) {
                return Err(ComputeError::Conflict(format!(
                    "dashboard framework {} already exists",
                    framework.name
                )));
            }
        }
        self.store.put_dashboard_framework(&framework)?;
        tracing::info!(framework_id = %id, "Updated dashboard framework");
        Ok(framework)
    }

    /// Delete a framework by name.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if no framework has this name.
    pub fn delete_by_name(&self, name: &str) -> Result<()> {
        let framework = self
            .get_by_name(name)?
            .ok_or_else(|| ComputeError::not_found(FRAMEWORK_KIND, name))?;
        match framework.id {
            Some(id) => self.delete(id),
            None => Err(ComputeError::not_found(FRAMEWORK_KIND, name)),
        }
    }

    /// The launch command for a dashboard.
    ///
    /// Custom dashboards use their literal command. Otherwise the named framework's
    /// template is used with `{repo}`, `{repobranch}` and `{mainFilePath}` filled
    /// from the dashboard. Whitespace runs collapse to one space.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if the named framework doesn't exist.
    pub fn resolve_command(&self, dashboard: &Dashboard) -> Result<String> {
        let command = if is_custom_framework(&dashboard.framework) {
            dashboard.command.clone()
        } else {
            let framework = self
                .get_by_name(&dashboard.framework)?
                .ok_or_else(|| ComputeError::not_found(FRAMEWORK_KIND, &dashboard.framework))?;
            framework
                .command_template
                .replace("{repo}", &dashboard.git_repo_url)
                .replace("{repobranch}", &dashboard.git_repo_branch)
                .replace("{mainFilePath}", &dashboard.main_file_path)
        };
        Ok(collapse_whitespace(&command))
    }

    fn validate(framework: &DashboardFramework) -> Result<()> {
        let mut v = Violations::new(FRAMEWORK_KIND);
        v.not_blank(&framework.name, "name cannot be blank");
        v.not_blank(&framework.command_template, "command template cannot be blank");
        v.finish()
    }
}

impl<S: Store> ConfigDeleter for DashboardFrameworkService<S> {
    fn kind(&self) -> &'static str {
        FRAMEWORK_KIND
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        self.retrieve(id)?;
        self.store.delete_dashboard_framework(id)?;
        tracing::info!(framework_id = %id, "Deleted dashboard framework");
        Ok(())
    }
}

/// Dashboard config administration and scope toggles.
pub struct DashboardConfigService<S: Store> {
    store: Arc<S>,
    frameworks: DashboardFrameworkService<S>,
}

impl<S: Store> Clone for DashboardConfigService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            frameworks: self.frameworks.clone(),
        }
    }
}

impl<S: Store> DashboardConfigService<S> {
    /// Create a new dashboard config service.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        let frameworks = DashboardFrameworkService::new(Arc::clone(&store));
        Self { store, frameworks }
    }

    /// The framework service used for validation.
    #[must_use]
    pub const fn frameworks(&self) -> &DashboardFrameworkService<S> {
        &self.frameworks
    }

    /// Whether a dashboard config exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn exists(&self, id: ConfigId) -> Result<bool> {
        Ok(self.store.get_dashboard_config(id)?.is_some())
    }

    /// Get a dashboard config by id.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if it doesn't exist.
    pub fn retrieve(&self, id: ConfigId) -> Result<DashboardConfig> {
        self.store
            .get_dashboard_config(id)?
            .ok_or_else(|| ComputeError::not_found(CONFIG_KIND, id))
    }

    /// All dashboard configs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self) -> Result<Vec<DashboardConfig>> {
        Ok(self.store.list_dashboard_configs()?)
    }

    /// Whether the dashboard config exists and its scopes admit `execution`.
    ///
    /// `execution` must carry a data type for a restricted `DataType` scope to pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_available(&self, id: ConfigId, execution: &ExecutionScope) -> Result<bool> {
        Ok(self
            .store
            .get_dashboard_config(id)?
            .is_some_and(|config| DASHBOARD_SCOPES.is_available(&config, execution)))
    }

    /// Dashboard configs available to `execution`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_available(&self, execution: &ExecutionScope) -> Result<Vec<DashboardConfig>> {
        Ok(DASHBOARD_SCOPES.filter_available(self.get_all()?, execution))
    }

    /// Create a dashboard config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` listing every violated rule, including
    /// references to environments, hardware or frameworks that don't exist.
    pub fn create(&self, mut config: DashboardConfig) -> Result<DashboardConfig> {
        self.validate(&config)?;
        let id = self.store.next_id(CONFIG_SEQUENCE)?;
        config.id = Some(id);
        self.store.put_dashboard_config(&config)?;
        tracing::info!(dashboard_id = %id, name = %config.dashboard.name, "Created dashboard config");
        Ok(config)
    }

    /// Replace an existing dashboard config.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::Validation` when the id is missing or a rule is
    /// violated, and `ComputeError::NotFound` when no such config exists.
    pub fn update(&self, config: DashboardConfig) -> Result<DashboardConfig> {
        let Some(id) = config.id else {
            return Err(ComputeError::Validation {
                kind: CONFIG_KIND,
                violations: vec!["id is required to update".to_string()],
            });
        };
        self.validate(&config)?;
        if !self.exists(id)? {
            return Err(ComputeError::not_found(CONFIG_KIND, id));
        }
        self.store.put_dashboard_config(&config)?;
        tracing::info!(dashboard_id = %id, "Updated dashboard config");
        Ok(config)
    }

    /// Open the dashboard to the whole site.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if the config doesn't exist.
    pub fn enable_for_site(&self, id: ConfigId) -> Result<DashboardConfig> {
        self.modify_scope(id, Scope::Site, |setting| setting.enabled = true)
    }

    /// Restrict the dashboard at the site level.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if the config doesn't exist.
    pub fn disable_for_site(&self, id: ConfigId) -> Result<DashboardConfig> {
        self.modify_scope(id, Scope::Site, |setting| setting.enabled = false)
    }

    /// Add a project to the dashboard's project allow-list.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if the config doesn't exist.
    pub fn enable_for_project(&self, id: ConfigId, project_id: &str) -> Result<DashboardConfig> {
        self.modify_scope(id, Scope::Project, |setting| {
            setting.ids.insert(project_id.to_string());
        })
    }

    /// Remove a project from the dashboard's project allow-list.
    ///
    /// # Errors
    ///
    /// Returns `ComputeError::NotFound` if the config doesn't exist.
    pub fn disable_for_project(&self, id: ConfigId, project_id: &str) -> Result<DashboardConfig> {
        self.modify_scope(id, Scope::Project, |setting| {
            setting.ids.remove(project_id);
        })
    }

    fn modify_scope(
        &self,
        id: ConfigId,
        scope: Scope,
        change: impl FnOnce(&mut ScopeSetting),
    ) -> Result<DashboardConfig> {
        let mut config = self.retrieve(id)?;
        let setting = config
            .scopes
            .entry(scope)
            .or_insert_with(|| ScopeSetting::restricted(scope, Vec::<String>::new()));
        change(setting);
        self.store.put_dashboard_config(&config)?;
        tracing::info!(dashboard_id = %id, scope = %scope, "Updated dashboard scope");
        Ok(config)
    }

    fn validate(&self, config: &DashboardConfig) -> Result<()> {
        let mut v = Violations::new(CONFIG_KIND);
        v.not_blank(&config.dashboard.name, "dashboard name cannot be blank");
        v.scopes(&DASHBOARD_SCOPES, &config.scopes);

        match config.compute_environment_config_id {
            None => v.check(false, "compute environment config is required"),
            Some(env) => v.check(
                self.store.get_environment_config(env)?.is_some(),
                format!("compute environment config {env} does not exist"),
            ),
        }
        match config.hardware_config_id {
            None => v.check(false, "hardware config is required"),
            Some(hw) => v.check(
                self.store.get_hardware_config(hw)?.is_some(),
                format!("hardware config {hw} does not exist"),
            ),
        }

        let framework = &config.dashboard.framework;
        if !is_custom_framework(framework) {
            v.check(
                self.frameworks.get_by_name(framework)?.is_some(),
                format!("dashboard framework {framework} does not exist"),
            );
        }
        v.finish()
    }
}

impl<S: Store> ConfigDeleter for DashboardConfigService<S> {
    fn kind(&self) -> &'static str {
        CONFIG_KIND
    }

    fn delete(&self, id: ConfigId) -> Result<()> {
        if !self.exists(id)? {
            return Err(ComputeError::not_found(CONFIG_KIND, id));
        }
        self.store.delete_dashboard_config(id)?;
        tracing::info!(dashboard_id = %id, "Deleted dashboard config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ComputeEnvironmentConfigService;
    use crate::hardware::HardwareConfigService;
    use crate::testing::{dashboard_config, environment_config, framework, hardware_config, open_scopes};
    use tempfile::TempDir;
    use xnat_jupyter_store::RocksStore;

    struct Fixture {
        store: Arc<RocksStore>,
        dashboards: DashboardConfigService<RocksStore>,
        env: ConfigId,
        hw: ConfigId,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let hw = HardwareConfigService::new(Arc::clone(&store))
            .create(hardware_config("small", open_scopes()))
            .unwrap();
        let env = ComputeEnvironmentConfigService::new(Arc::clone(&store))
            .create(environment_config("voila", false, vec![hw.clone()]))
            .unwrap();
        Fixture {
            dashboards: DashboardConfigService::new(Arc::clone(&store)),
            store,
            env: env.id.unwrap(),
            hw: hw.id.unwrap(),
            _dir: dir,
        }
    }

    #[test]
    fn collapse_whitespace_runs() {
        assert_eq!(collapse_whitespace("voila  \n\t app.ipynb"), "voila app.ipynb");
    }

    #[test]
    fn custom_command_used_verbatim() {
        let f = setup();
        let mut dashboard = Dashboard {
            name: "custom".into(),
            framework: "Custom".into(),
            command: "python   app.py".into(),
            ..Dashboard::default()
        };
        let frameworks = f.dashboards.frameworks();
        assert_eq!(frameworks.resolve_command(&dashboard).unwrap(), "python app.py");

        dashboard.framework = String::new();
        assert_eq!(frameworks.resolve_command(&dashboard).unwrap(), "python app.py");
    }

    #[test]
    fn framework_template_substitutes_placeholders() {
        let f = setup();
        let frameworks = f.dashboards.frameworks();
        frameworks
            .create(framework(
                "Voila",
                "git clone {repo} -b {repobranch} repo &&\n   voila repo/{mainFilePath}",
            ))
            .unwrap();
        let dashboard = Dashboard {
            name: "qc".into(),
            framework: "voila".into(),
            git_repo_url: "https://github.com/org/qc.git".into(),
            git_repo_branch: "main".into(),
            main_file_path: "qc.ipynb".into(),
            ..Dashboard::default()
        };

        assert_eq!(
            frameworks.resolve_command(&dashboard).unwrap(),
            "git clone https://github.com/org/qc.git -b main repo && voila repo/qc.ipynb"
        );
    }

    #[test]
    fn unknown_framework_is_not_found() {
        let f = setup();
        let dashboard = Dashboard {
            name: "qc".into(),
            framework: "Panel".into(),
            ..Dashboard::default()
        };
        assert!(matches!(
            f.dashboards.frameworks().resolve_command(&dashboard),
            Err(ComputeError::NotFound { .. })
        ));
    }

    #[test]
    fn framework_names_are_unique() {
        let f = setup();
        let frameworks = f.dashboards.frameworks();
        frameworks.create(framework("Streamlit", "streamlit run {mainFilePath}")).unwrap();
        assert!(matches!(
            frameworks.create(framework("streamlit", "x")),
            Err(ComputeError::Conflict(_))
        ));
        frameworks.delete_by_name("STREAMLIT").unwrap();
        assert!(frameworks.get_all().unwrap().is_empty());
    }

    #[test]
    fn create_validates_references() {
        let f = setup();
        let mut config = dashboard_config("qc", f.env, f.hw);
        config.compute_environment_config_id = Some(ConfigId::new(404));
        config.hardware_config_id = None;
        config.dashboard.framework = "Panel".into();

        match f.dashboards.create(config) {
            Err(ComputeError::Validation { violations, .. }) => assert_eq!(
                violations,
                vec![
                    "compute environment config 404 does not exist",
                    "hardware config is required",
                    "dashboard framework Panel does not exist",
                ]
            ),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn scope_toggles() {
        let f = setup();
        let created = f.dashboards.create(dashboard_config("qc", f.env, f.hw)).unwrap();
        let id = created.id.unwrap();
        let p1 = ExecutionScope::new()
            .user("u1")
            .project("p1")
            .data_type("xnat:mrSessionData");

        f.dashboards.disable_for_site(id).unwrap();
        assert!(!f.dashboards.is_available(id, &p1).unwrap());
        f.dashboards.enable_for_site(id).unwrap();

        // Project scope is restricted with an empty allow-list in the fixture
        assert!(!f.dashboards.is_available(id, &p1).unwrap());
        f.dashboards.enable_for_project(id, "p1").unwrap();
        assert!(f.dashboards.is_available(id, &p1).unwrap());
        assert_eq!(f.dashboards.get_available(&p1).unwrap().len(), 1);

        f.dashboards.disable_for_project(id, "p1").unwrap();
        assert!(!f.dashboards.is_available(id, &p1).unwrap());
    }

    #[test]
    fn pinned_hardware_and_environment_cannot_be_deleted() {
        let f = setup();
        let dashboard = f.dashboards.create(dashboard_config("qc", f.env, f.hw)).unwrap();

        let hardware = HardwareConfigService::new(Arc::clone(&f.store));
        let environments = ComputeEnvironmentConfigService::new(Arc::clone(&f.store));

        assert!(matches!(hardware.delete(f.hw), Err(ComputeError::Conflict(_))));
        assert!(matches!(environments.delete(f.env), Err(ComputeError::Conflict(_))));
        assert!(hardware.exists(f.hw).unwrap());
        assert!(environments.exists(f.env).unwrap());
        assert_eq!(
            f.dashboards.retrieve(dashboard.id.unwrap()).unwrap().hardware_config_id,
            Some(f.hw)
        );

        f.dashboards.delete(dashboard.id.unwrap()).unwrap();
        hardware.delete(f.hw).unwrap();
        environments.delete(f.env).unwrap();
    }
}
