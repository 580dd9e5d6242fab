//! Hub plugin preferences.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for talking to the Hub and driving server lifecycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubPreferences {
    /// Base URL of the Hub REST API.
    pub jupyterhub_api_url: String,
    /// API token the Hub accepts from this service.
    pub jupyterhub_token: String,
    /// Public URL of the XNAT site, handed to notebooks as `XNAT_HOST`.
    pub site_url: String,
    /// Root directory holding one workspace per user.
    pub workspace_root_path: String,
    /// How long to wait for a server to become ready.
    pub start_timeout_secs: u64,
    /// Pause between readiness polls.
    pub start_polling_interval_secs: u64,
    /// How long to wait for a server to disappear.
    pub stop_timeout_secs: u64,
    /// Pause between absence polls.
    pub stop_polling_interval_secs: u64,
    /// Minutes without activity before a server is culled; 0 disables.
    pub inactivity_timeout_minutes: i64,
    /// Hours a server may run before it is culled; 0 disables.
    pub max_server_lifetime_hours: i64,
    /// Archive path prefix as XNAT sees it.
    pub archive_path_prefix: String,
    /// Replacement for `archive_path_prefix` on the container host.
    pub archive_container_prefix: String,
    /// Workspace path prefix as XNAT sees it.
    pub workspace_path_prefix: String,
    /// Replacement for `workspace_path_prefix` on the container host.
    pub workspace_container_prefix: String,
    /// Number of lifecycle workers.
    pub worker_count: usize,
    /// Capacity of the lifecycle job queue.
    pub queue_capacity: usize,
    /// Seconds between cull sweeps.
    pub cull_interval_secs: u64,
    /// Seconds a finished request's event log stays readable.
    pub event_retention_secs: u64,
    /// Most finished requests the event tracker keeps.
    pub event_capacity: usize,
}

impl Default for HubPreferences {
    fn default() -> Self {
        Self {
            jupyterhub_api_url: "http://172.17.0.1/jupyterhub/hub/api".to_string(),
            jupyterhub_token: "secret-token".to_string(),
            site_url: "http://localhost".to_string(),
            workspace_root_path: "/data/xnat/workspaces".to_string(),
            start_timeout_secs: 180,
            start_polling_interval_secs: 8,
            stop_timeout_secs: 60,
            stop_polling_interval_secs: 2,
            inactivity_timeout_minutes: 60,
            max_server_lifetime_hours: 48,
            archive_path_prefix: String::new(),
            archive_container_prefix: String::new(),
            workspace_path_prefix: String::new(),
            workspace_container_prefix: String::new(),
            worker_count: 4,
            queue_capacity: 64,
            cull_interval_secs: 300,
            event_retention_secs: 3600,
            event_capacity: 1000,
        }
    }
}

fn parse_into<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        match val.trim().parse() {
            Ok(n) => *target = n,
            Err(_) => tracing::warn!(var = name, value = %val, "Ignoring unparseable setting"),
        }
    }
}

fn string_into(name: &str, target: &mut String) {
    if let Ok(val) = std::env::var(name) {
        *target = val;
    }
}

impl HubPreferences {
    /// Load preferences from environment variables over the defaults.
    ///
    /// Supported environment variables:
    /// - `JUPYTERHUB_API_URL`, `JUPYTERHUB_TOKEN`, `XNAT_SITE_URL`, `WORKSPACE_ROOT_PATH`
    /// - `START_TIMEOUT`, `START_POLLING_INTERVAL`, `STOP_TIMEOUT`, `STOP_POLLING_INTERVAL`
    /// - `INACTIVITY_TIMEOUT` (minutes), `MAX_SERVER_LIFETIME` (hours)
    /// - `PATH_TRANSLATION_ARCHIVE_PREFIX`, `PATH_TRANSLATION_ARCHIVE_DOCKER_PREFIX`
    /// - `PATH_TRANSLATION_WORKSPACE_PREFIX`, `PATH_TRANSLATION_WORKSPACE_DOCKER_PREFIX`
    /// - `WORKER_COUNT`, `QUEUE_CAPACITY`, `CULL_INTERVAL` (seconds)
    /// - `EVENT_RETENTION` (seconds), `EVENT_CAPACITY`
    ///
    /// Numeric values that fail to parse keep their default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        string_into("JUPYTERHUB_API_URL", &mut config.jupyterhub_api_url);
        string_into("JUPYTERHUB_TOKEN", &mut config.jupyterhub_token);
        string_into("XNAT_SITE_URL", &mut config.site_url);
        string_into("WORKSPACE_ROOT_PATH", &mut config.workspace_root_path);
        parse_into("START_TIMEOUT", &mut config.start_timeout_secs);
        parse_into("START_POLLING_INTERVAL", &mut config.start_polling_interval_secs);
        parse_into("STOP_TIMEOUT", &mut config.stop_timeout_secs);
        parse_into("STOP_POLLING_INTERVAL", &mut config.stop_polling_interval_secs);
        parse_into("INACTIVITY_TIMEOUT", &mut config.inactivity_timeout_minutes);
        parse_into("MAX_SERVER_LIFETIME", &mut config.max_server_lifetime_hours);
        string_into("PATH_TRANSLATION_ARCHIVE_PREFIX", &mut config.archive_path_prefix);
        string_into(
            "PATH_TRANSLATION_ARCHIVE_DOCKER_PREFIX",
            &mut config.archive_container_prefix,
        );
        string_into("PATH_TRANSLATION_WORKSPACE_PREFIX", &mut config.workspace_path_prefix);
        string_into(
            "PATH_TRANSLATION_WORKSPACE_DOCKER_PREFIX",
            &mut config.workspace_container_prefix,
        );
        parse_into("WORKER_COUNT", &mut config.worker_count);
        parse_into("QUEUE_CAPACITY", &mut config.queue_capacity);
        parse_into("CULL_INTERVAL", &mut config.cull_interval_secs);
        parse_into("EVENT_RETENTION", &mut config.event_retention_secs);
        parse_into("EVENT_CAPACITY", &mut config.event_capacity);

        config
    }

    /// Start poll budget.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Start poll interval.
    #[must_use]
    pub const fn start_polling_interval(&self) -> Duration {
        Duration::from_secs(self.start_polling_interval_secs)
    }

    /// Stop poll budget.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Stop poll interval.
    #[must_use]
    pub const fn stop_polling_interval(&self) -> Duration {
        Duration::from_secs(self.stop_polling_interval_secs)
    }

    /// How long finished event logs are kept.
    #[must_use]
    pub const fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_secs)
    }

    /// Map an archive path onto the container host.
    #[must_use]
    pub fn translate_archive_path(&self, path: &str) -> String {
        translate(path, &self.archive_path_prefix, &self.archive_container_prefix)
    }

    /// Map a workspace path onto the container host.
    #[must_use]
    pub fn translate_workspace_path(&self, path: &str) -> String {
        translate(
            path,
            &self.workspace_path_prefix,
            &self.workspace_container_prefix,
        )
    }
}

/// Replace `from` with `to` at the start of `path` when both are set.
fn translate(path: &str, from: &str, to: &str) -> String {
    if from.is_empty() || to.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(from) {
        Some(rest) => format!("{to}{rest}"),
        None => path.to_string(),
    }
}
