//! JupyterHub REST API models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use xnat_jupyter_core::UserId;

/// Hub version and deployment details from `GET /` and `GET /info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    /// Hub version.
    pub version: String,
    /// Python version string, present on `/info`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    /// Path of the Hub's Python interpreter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_executable: Option<String>,
    /// Authenticator class and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<serde_json::Value>,
    /// Spawner class and version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawner: Option<serde_json::Value>,
}

/// A single-user server as reported by the Hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Server name, empty for the default server.
    #[serde(default)]
    pub name: String,
    /// Whether the server is up and accepting requests.
    #[serde(default)]
    pub ready: bool,
    /// Pending action, e.g. "spawn" or "stop".
    #[serde(default)]
    pub pending: Option<String>,
    /// Path of the server relative to the Hub host.
    #[serde(default)]
    pub url: String,
    /// Spawn progress event stream.
    #[serde(default)]
    pub progress_url: Option<String>,
    /// Options the server was spawned with.
    #[serde(default)]
    pub user_options: Option<serde_json::Value>,
    /// When the server was started.
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    /// Last observed activity.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// A Hub user with their named servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Hub username, identical to the XNAT username.
    pub name: String,
    /// Whether the user is a Hub admin.
    #[serde(default)]
    pub admin: bool,
    /// Hub roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Hub groups.
    #[serde(default)]
    pub groups: Vec<String>,
    /// URL of the default server.
    #[serde(default)]
    pub server: Option<String>,
    /// Pending action on the default server.
    #[serde(default)]
    pub pending: Option<String>,
    /// Last observed activity.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// Running servers keyed by name; the default server uses "".
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
}

impl User {
    /// The server with `servername`, if the Hub reports one.
    #[must_use]
    pub fn server(&self, servername: &str) -> Option<&Server> {
        self.servers.get(servername)
    }
}

/// An API token issued by the Hub.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Token value, only returned at creation.
    #[serde(default)]
    pub token: Option<String>,
    /// Token id.
    #[serde(default)]
    pub id: Option<String>,
    /// Owning user.
    #[serde(default)]
    pub user: Option<String>,
    /// Token kind.
    #[serde(default)]
    pub kind: Option<String>,
    /// Owning service.
    #[serde(default)]
    pub service: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Free text note.
    #[serde(default)]
    pub note: Option<String>,
    /// OAuth client the token was issued to.
    #[serde(default)]
    pub oauth_client: Option<String>,
    /// Session the token belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Expiry time.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Lifetime in seconds, request side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Creation time.
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Last use.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Spawn options sent with a start request.
///
/// The Hub spawner reads these back to fetch the stored launch record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XnatUserOptions {
    /// XNAT user id.
    pub user_id: UserId,
    /// XNAT data type of the item.
    pub xsi_type: String,
    /// Item id.
    pub item_id: String,
    /// Item label.
    pub item_label: String,
    /// Project id.
    pub project_id: String,
    /// Tracking id of the start request.
    pub event_tracking_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_parses_named_servers() {
        let user: User = serde_json::from_value(serde_json::json!({
            "name": "andy",
            "admin": false,
            "servers": {
                "": {
                    "name": "",
                    "ready": true,
                    "url": "/jupyterhub/user/andy/",
                    "started": "2026-10-01T12:00:00Z",
                    "last_activity": "2026-10-01T12:30:00Z"
                }
            }
        }))
        .unwrap();

        let server = user.server("").unwrap();
        assert!(server.ready);
        assert_eq!(server.url, "/jupyterhub/user/andy/");
        assert!(user.server("other").is_none());
    }

    #[test]
    fn user_options_use_hub_field_names() {
        let options = XnatUserOptions {
            user_id: UserId::new(7),
            xsi_type: "xnat:projectData".into(),
            item_id: "p1".into(),
            item_label: "Project 1".into(),
            project_id: "p1".into(),
            event_tracking_id: "abc".into(),
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["userId"], 7);
        assert_eq!(json["xsiType"], "xnat:projectData");
        assert_eq!(json["eventTrackingId"], "abc");
    }
}
