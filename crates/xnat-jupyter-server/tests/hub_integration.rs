//! Integration tests against a real JupyterHub.
//!
//! These tests require a JupyterHub with the REST API enabled. Point them at
//! it with `JUPYTERHUB_API_URL` and an admin `JUPYTERHUB_TOKEN`.
//!
//! Run with:
//!   cargo test -p xnat-jupyter-server --test hub_integration -- --ignored
//!
//! The default spawner must be able to start a server for `USERNAME` without
//! XNAT options for the lifecycle test to pass.

use std::time::Duration;

use xnat_jupyter_core::UserId;
use xnat_jupyter_server::{
    HttpHubClient, HubClient, HubPreferences, ServerError, Token, XnatUserOptions,
};

const USERNAME: &str = "xnat-integration";

/// How long to wait for a spawn or a stop.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(120);

fn client() -> HttpHubClient {
    let prefs = HubPreferences::from_env();
    HttpHubClient::new(prefs.jupyterhub_api_url, prefs.jupyterhub_token)
        .expect("Failed to build Hub client")
}

fn options() -> XnatUserOptions {
    XnatUserOptions {
        user_id: UserId::new(1),
        xsi_type: "xnat:projectData".into(),
        item_id: "integration".into(),
        item_label: "integration".into(),
        project_id: "integration".into(),
        event_tracking_id: "integration-test".into(),
    }
}

#[tokio::test]
#[ignore = "requires a running JupyterHub"]
async fn hub_reports_version_and_info() {
    let hub = client();

    let version = hub.get_version().await.expect("Hub should be reachable");
    assert!(!version.version.is_empty());

    let info = hub.get_info().await.expect("Token should be accepted");
    assert_eq!(info.version, version.version);
}

#[tokio::test]
#[ignore = "requires a running JupyterHub"]
async fn bad_token_is_rejected() {
    let prefs = HubPreferences::from_env();
    let hub = HttpHubClient::new(prefs.jupyterhub_api_url, "not-a-token").unwrap();

    assert!(matches!(
        hub.get_info().await,
        Err(ServerError::HubUnreachable(_))
    ));
}

#[tokio::test]
#[ignore = "requires a running JupyterHub"]
async fn server_lifecycle() {
    let hub = client();
    if hub.get_user(USERNAME).await.unwrap().is_none() {
        hub.create_user(USERNAME).await.unwrap();
    }
    hub.stop_server(USERNAME, "").await.unwrap();

    hub.start_server(USERNAME, "", &options()).await.unwrap();
    let ready = tokio::time::timeout(LIFECYCLE_TIMEOUT, async {
        loop {
            if let Some(server) = hub.get_server(USERNAME, "").await.unwrap() {
                if server.ready {
                    return server;
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
    .await
    .expect("Server did not become ready");
    assert!(ready.url.contains(USERNAME));

    assert!(matches!(
        hub.start_server(USERNAME, "", &options()).await,
        Err(ServerError::AlreadyExists(_))
    ));

    hub.stop_server(USERNAME, "").await.unwrap();
    tokio::time::timeout(LIFECYCLE_TIMEOUT, async {
        while hub.get_server(USERNAME, "").await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
    .await
    .expect("Server did not stop");
}

#[tokio::test]
#[ignore = "requires a running JupyterHub"]
async fn token_is_scoped() {
    let hub = client();
    if hub.get_user(USERNAME).await.unwrap().is_none() {
        hub.create_user(USERNAME).await.unwrap();
    }

    let request = Token {
        note: Some("integration".into()),
        expires_in: Some(60),
        scopes: vec![format!("access:servers!user={USERNAME}")],
        ..Token::default()
    };
    let token = hub.create_token(USERNAME, &request).await.unwrap();

    assert!(token.token.is_some());
    assert!(token.scopes.iter().any(|s| s.starts_with("access:servers")));
}
