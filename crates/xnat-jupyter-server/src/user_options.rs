//! Launch records handed to the Hub spawner.
//!
//! Before a server is started, the resolved job template is lowered into a
//! [`TaskTemplate`], the user's workspace and the item's archive directories
//! are mounted, XNAT connection details are injected, and the result is saved
//! under `(user id, servername)`. The spawner fetches it back by that key.

use std::sync::Arc;

use chrono::Utc;

use xnat_jupyter_compute::{
    DashboardJobTemplateResolver, DashboardTemplateResolver, DefaultJobTemplateResolver,
    JobTemplate, JobTemplateResolver,
};
use xnat_jupyter_core::{ConfigId, ExecutionScope, TrackingId, XnatUser};
use xnat_jupyter_store::{BindMount, MountKind, Store, StoreError, TaskTemplate, UserOptions};

use crate::collaborators::{ArchiveItem, ArchiveLocator, CredentialIssuer, PermissionChecker};
use crate::config::HubPreferences;
use crate::error::{Result, ServerError};

/// Container path under which the archive is mounted.
pub const DATA_ROOT: &str = "/data";

/// A validated request to launch a server on an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Server name, empty for the default server.
    pub servername: String,
    /// XNAT data type of the item.
    pub xsi_type: String,
    /// Item id.
    pub item_id: String,
    /// Item label.
    pub item_label: String,
    /// Owning project.
    pub project_id: String,
    /// Compute environment config.
    pub environment: ConfigId,
    /// Hardware config.
    pub hardware: ConfigId,
    /// Dashboard config, when launching a dashboard.
    pub dashboard: Option<ConfigId>,
    /// Tracking id of the request.
    pub tracking_id: TrackingId,
}

impl Launch {
    /// Scope the launch runs under.
    #[must_use]
    pub fn execution_scope(&self, user: &XnatUser) -> ExecutionScope {
        ExecutionScope::new()
            .user(user.username.as_str())
            .project(self.project_id.as_str())
            .data_type(self.xsi_type.as_str())
    }
}

/// Container path of a user's workspace.
#[must_use]
pub fn workspace_mount_path(username: &str) -> String {
    format!("/workspace/{username}")
}

/// Builds, saves and retrieves launch records.
pub struct UserOptionsService<S: Store> {
    store: Arc<S>,
    resolver: DefaultJobTemplateResolver<S>,
    dashboards: DashboardJobTemplateResolver<S>,
    permissions: Arc<dyn PermissionChecker>,
    archive: Arc<dyn ArchiveLocator>,
    credentials: Arc<dyn CredentialIssuer>,
    preferences: Arc<HubPreferences>,
}

impl<S: Store> Clone for UserOptionsService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            resolver: self.resolver.clone(),
            dashboards: self.dashboards.clone(),
            permissions: Arc::clone(&self.permissions),
            archive: Arc::clone(&self.archive),
            credentials: Arc::clone(&self.credentials),
            preferences: Arc::clone(&self.preferences),
        }
    }
}

impl<S: Store> UserOptionsService<S> {
    /// Create a new user options service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        permissions: Arc<dyn PermissionChecker>,
        archive: Arc<dyn ArchiveLocator>,
        credentials: Arc<dyn CredentialIssuer>,
        preferences: Arc<HubPreferences>,
    ) -> Self {
        Self {
            resolver: DefaultJobTemplateResolver::new(Arc::clone(&store)),
            dashboards: DashboardJobTemplateResolver::new(Arc::clone(&store)),
            store,
            permissions,
            archive,
            credentials,
            preferences,
        }
    }

    /// Whether `user` may read the launch's item.
    #[must_use]
    pub fn can_read(&self, user: &XnatUser, launch: &Launch) -> bool {
        self.permissions
            .can_read(user, &launch.project_id, &launch.item_id, &launch.xsi_type)
    }

    /// Whether the launch's compute pair, or dashboard, is available to `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a dashboard's pins
    /// disagree with the requested pair.
    pub fn is_available(&self, user: &XnatUser, launch: &Launch) -> Result<bool> {
        let execution = launch.execution_scope(user);
        let available = match launch.dashboard {
            Some(dashboard) => self.dashboards.is_dashboard_available(
                &execution,
                dashboard,
                launch.environment,
                launch.hardware,
            )?,
            None => self
                .resolver
                .is_available(&execution, launch.environment, launch.hardware)?,
        };
        Ok(available)
    }

    fn resolve(&self, user: &XnatUser, launch: &Launch) -> Result<JobTemplate> {
        let execution = launch.execution_scope(user);
        let template = match launch.dashboard {
            Some(dashboard) => self.dashboards.resolve_dashboard(
                &execution,
                dashboard,
                launch.environment,
                launch.hardware,
            )?,
            None => self
                .resolver
                .resolve(&execution, launch.environment, launch.hardware)?,
        };
        Ok(template)
    }

    /// Build and save the launch record for `user`.
    ///
    /// An existing record for the same server is replaced, keeping its
    /// creation time.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::PermissionDenied` if the user cannot read the item,
    /// a compute error if resolution fails, or a store error.
    pub fn store_user_options(&self, user: &XnatUser, launch: &Launch) -> Result<UserOptions> {
        tracing::debug!(
            username = %user.username,
            servername = %launch.servername,
            xsi_type = %launch.xsi_type,
            item_id = %launch.item_id,
            project_id = %launch.project_id,
            "Storing user options"
        );

        if !self.can_read(user, launch) {
            return Err(ServerError::PermissionDenied(format!(
                "{} cannot read {} {} in project {}",
                user.username, launch.xsi_type, launch.item_id, launch.project_id
            )));
        }

        let mut task_template = self.resolve(user, launch)?.to_task_template();
        self.add_mounts(&mut task_template, user, launch)?;
        self.add_environment(&mut task_template, user, launch)?;

        let now = Utc::now();
        let created_at = self
            .store
            .get_user_options(user.id, &launch.servername)?
            .map_or(now, |existing| existing.created_at);

        let options = UserOptions {
            user_id: user.id,
            servername: launch.servername.clone(),
            xsi_type: launch.xsi_type.clone(),
            item_id: launch.item_id.clone(),
            project_id: launch.project_id.clone(),
            event_tracking_id: launch.tracking_id.to_string(),
            task_template,
            created_at,
            updated_at: now,
        };
        self.store.put_user_options(&options)?;

        tracing::info!(
            username = %user.username,
            servername = %launch.servername,
            image = %options.task_template.container_spec.image,
            mounts = options.task_template.container_spec.mounts.len(),
            "Stored user options"
        );
        Ok(options)
    }

    /// The launch record for a server, if one exists and the user can still
    /// read its item.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn retrieve_user_options(
        &self,
        user: &XnatUser,
        servername: &str,
    ) -> Result<Option<UserOptions>> {
        let Some(options) = self.store.get_user_options(user.id, servername)? else {
            return Ok(None);
        };

        if self.permissions.can_read(
            user,
            &options.project_id,
            &options.item_id,
            &options.xsi_type,
        ) {
            Ok(Some(options))
        } else {
            tracing::debug!(
                username = %user.username,
                servername = %servername,
                "Withholding user options, item no longer readable"
            );
            Ok(None)
        }
    }

    /// Delete the launch record for a server. A missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn remove_user_options(&self, user: &XnatUser, servername: &str) -> Result<()> {
        match self.store.delete_user_options(user.id, servername) {
            Ok(()) => {
                tracing::debug!(username = %user.username, servername = %servername, "Removed user options");
                Ok(())
            }
            Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn add_mounts(&self, task: &mut TaskTemplate, user: &XnatUser, launch: &Launch) -> Result<()> {
        let prefs = &self.preferences;
        let workspace = format!(
            "{}/{}",
            prefs.workspace_root_path.trim_end_matches('/'),
            user.username
        );
        let workspace_target = workspace_mount_path(&user.username);

        let mut mounts = vec![BindMount {
            name: workspace_target.clone(),
            writable: true,
            container_host_path: prefs.translate_workspace_path(&workspace),
            xnat_host_path: workspace,
            jupyter_host_path: workspace_target,
            kind: MountKind::Bind,
        }];

        let item = ArchiveItem {
            xsi_type: &launch.xsi_type,
            item_id: &launch.item_id,
            project_id: &launch.project_id,
        };
        let paths = self.archive.data_paths(user, item, &launch.tracking_id)?;
        mounts.extend(paths.into_iter().map(|(target, source)| BindMount {
            name: target.clone(),
            writable: false,
            container_host_path: prefs.translate_archive_path(&source),
            xnat_host_path: source,
            jupyter_host_path: target,
            kind: MountKind::Bind,
        }));

        task.container_spec.mounts.extend(mounts);
        Ok(())
    }

    fn add_environment(
        &self,
        task: &mut TaskTemplate,
        user: &XnatUser,
        launch: &Launch,
    ) -> Result<()> {
        let credentials = self.credentials.issue(user)?;
        let workspace = workspace_mount_path(&user.username);

        task.container_spec.env.extend([
            ("XNAT_HOST".to_string(), self.preferences.site_url.clone()),
            ("XNAT_USER".to_string(), credentials.alias),
            ("XNAT_PASS".to_string(), credentials.secret),
            ("XNAT_DATA".to_string(), DATA_ROOT.to_string()),
            ("XNAT_XSI_TYPE".to_string(), launch.xsi_type.clone()),
            ("XNAT_ITEM_ID".to_string(), launch.item_id.clone()),
            ("JUPYTERHUB_ROOT_DIR".to_string(), workspace.clone()),
            ("XDG_CONFIG_HOME".to_string(), workspace),
        ]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::{StaticArchive, StaticCredentials, StaticPermissions};
    use tempfile::TempDir;
    use xnat_jupyter_compute::testing::{
        dashboard_config, environment_config, framework, hardware_config, open_scopes,
        user_project_scopes,
    };
    use xnat_jupyter_compute::{
        ComputeEnvironmentConfigService, ComputeError, DashboardConfigService,
        HardwareConfigService,
    };
    use xnat_jupyter_core::{scope_map, Scope, ScopeSetting, UserId};
    use xnat_jupyter_store::{EnvironmentVariable, RocksStore};

    struct Fixture {
        service: UserOptionsService<RocksStore>,
        store: Arc<RocksStore>,
        permissions: Arc<StaticPermissions>,
        environment: ConfigId,
        hardware: ConfigId,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());

        let hardware = HardwareConfigService::new(Arc::clone(&store))
            .create(hardware_config("small", open_scopes()))
            .unwrap();
        let mut environment = environment_config("scipy", true, vec![]);
        environment.compute_environment.environment_variables =
            vec![EnvironmentVariable::new("XNAT_DATA", "/elsewhere")];
        let environment = ComputeEnvironmentConfigService::new(Arc::clone(&store))
            .create(environment)
            .unwrap();

        let permissions = Arc::new(StaticPermissions::new());
        permissions.grant("andy", "p1");

        let preferences = HubPreferences {
            site_url: "https://xnat.example.org".into(),
            workspace_root_path: "/data/xnat/workspaces/".into(),
            workspace_path_prefix: "/data/xnat/workspaces".into(),
            workspace_container_prefix: "/docker/workspaces".into(),
            archive_path_prefix: "/data/xnat/archive".into(),
            archive_container_prefix: "/docker/archive".into(),
            ..HubPreferences::default()
        };

        Fixture {
            service: UserOptionsService::new(
                Arc::clone(&store),
                Arc::clone(&permissions) as Arc<dyn PermissionChecker>,
                Arc::new(StaticArchive),
                Arc::new(StaticCredentials),
                Arc::new(preferences),
            ),
            store,
            permissions,
            environment: environment.id.unwrap(),
            hardware: hardware.id.unwrap(),
            _dir: dir,
        }
    }

    fn user() -> XnatUser {
        XnatUser::new(UserId::new(3), "andy")
    }

    fn launch(f: &Fixture) -> Launch {
        Launch {
            servername: String::new(),
            xsi_type: "xnat:projectData".into(),
            item_id: "p1".into(),
            item_label: "Project 1".into(),
            project_id: "p1".into(),
            environment: f.environment,
            hardware: f.hardware,
            dashboard: None,
            tracking_id: "t-1".parse().unwrap(),
        }
    }

    #[test]
    fn stores_mounts_and_environment() {
        let f = setup();
        let options = f.service.store_user_options(&user(), &launch(&f)).unwrap();

        let spec = &options.task_template.container_spec;
        assert_eq!(spec.image, "jupyter/scipy-notebook:hub-3.0.0");

        let workspace = &spec.mounts[0];
        assert!(workspace.writable);
        assert_eq!(workspace.jupyter_host_path, "/workspace/andy");
        assert_eq!(workspace.xnat_host_path, "/data/xnat/workspaces/andy");
        assert_eq!(workspace.container_host_path, "/docker/workspaces/andy");

        let data: Vec<_> = spec.mounts[1..].iter().collect();
        assert_eq!(data.len(), 2);
        assert!(data.iter().all(|m| !m.writable));
        assert_eq!(data[0].jupyter_host_path, "/data/projects/p1/experiments");
        assert_eq!(data[0].container_host_path, "/docker/archive/p1/arc001");

        assert_eq!(spec.env["XNAT_HOST"], "https://xnat.example.org");
        assert_eq!(spec.env["XNAT_USER"], "alias-andy");
        assert_eq!(spec.env["XNAT_PASS"], "secret-andy");
        assert_eq!(spec.env["XNAT_DATA"], "/data");
        assert_eq!(spec.env["XNAT_ITEM_ID"], "p1");
        assert_eq!(spec.env["JUPYTERHUB_ROOT_DIR"], "/workspace/andy");
        assert_eq!(spec.env["XDG_CONFIG_HOME"], "/workspace/andy");
        assert_eq!(options.event_tracking_id, "t-1");
    }

    #[test]
    fn upsert_keeps_creation_time() {
        let f = setup();
        let first = f.service.store_user_options(&user(), &launch(&f)).unwrap();

        let mut second_launch = launch(&f);
        second_launch.tracking_id = "t-2".parse().unwrap();
        let second = f.service.store_user_options(&user(), &second_launch).unwrap();

        assert_eq!(second.created_at, first.created_at);
        let stored = f.store.get_user_options(UserId::new(3), "").unwrap().unwrap();
        assert_eq!(stored.event_tracking_id, "t-2");
    }

    #[test]
    fn denied_read_stores_nothing() {
        let f = setup();
        f.permissions.revoke("andy", "p1");

        assert!(matches!(
            f.service.store_user_options(&user(), &launch(&f)),
            Err(ServerError::PermissionDenied(_))
        ));
        assert!(f.store.get_user_options(UserId::new(3), "").unwrap().is_none());
    }

    #[test]
    fn unavailable_pair_is_rejected() {
        let f = setup();
        let hidden = HardwareConfigService::new(Arc::clone(&f.store))
            .create(hardware_config("hidden", user_project_scopes("zoe", "p1")))
            .unwrap();
        let mut request = launch(&f);
        request.hardware = hidden.id.unwrap();

        assert!(!f.service.is_available(&user(), &request).unwrap());
        assert!(matches!(
            f.service.store_user_options(&user(), &request),
            Err(ServerError::Compute(ComputeError::Unavailable(_)))
        ));
    }

    #[test]
    fn retrieve_rechecks_permission() {
        let f = setup();
        f.service.store_user_options(&user(), &launch(&f)).unwrap();
        assert!(f.service.retrieve_user_options(&user(), "").unwrap().is_some());

        f.permissions.revoke("andy", "p1");
        assert!(f.service.retrieve_user_options(&user(), "").unwrap().is_none());
        assert!(f.store.get_user_options(UserId::new(3), "").unwrap().is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let f = setup();
        f.service.store_user_options(&user(), &launch(&f)).unwrap();
        f.service.remove_user_options(&user(), "").unwrap();
        f.service.remove_user_options(&user(), "").unwrap();
        assert!(f.service.retrieve_user_options(&user(), "").unwrap().is_none());
    }

    #[test]
    fn dashboard_launch_overrides_command() {
        let f = setup();
        let mut dashboard = dashboard_config("qc", f.environment, f.hardware);
        dashboard.dashboard.framework = "panel".into();
        dashboard.dashboard.main_file_path = "app.py".into();
        dashboard.scopes = scope_map([
            ScopeSetting::open(Scope::Site),
            ScopeSetting::restricted(Scope::Project, ["p1"]),
            ScopeSetting::open(Scope::DataType),
        ]);
        let dashboards = DashboardConfigService::new(Arc::clone(&f.store));
        dashboards
            .frameworks()
            .create(framework("panel", "panel serve {mainFilePath}"))
            .unwrap();
        let dashboard = dashboards.create(dashboard).unwrap();

        let mut request = launch(&f);
        request.dashboard = dashboard.id;

        assert!(f.service.is_available(&user(), &request).unwrap());
        let options = f.service.store_user_options(&user(), &request).unwrap();
        assert_eq!(
            options.task_template.container_spec.command,
            "panel serve app.py"
        );
    }
}
