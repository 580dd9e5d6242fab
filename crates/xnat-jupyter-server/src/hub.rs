//! JupyterHub REST client.
//!
//! The [`HubClient`] trait is the only way the orchestrator touches the Hub.
//! [`HttpHubClient`] talks to a real Hub; the `mock` module provides an
//! in-memory Hub for tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::{Result, ServerError};
use crate::types::{Hub, Server, Token, User, XnatUserOptions};

/// Operations the orchestrator needs from the Hub.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Hub version. Needs no authentication.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::HubUnreachable` if the Hub cannot be reached.
    async fn get_version(&self) -> Result<Hub>;

    /// Hub deployment details. Needs a valid token.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub is unreachable or rejects the token.
    async fn get_info(&self) -> Result<Hub>;

    /// A user, or `None` if the Hub has no such user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_user(&self, username: &str) -> Result<Option<User>>;

    /// Every Hub user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_users(&self) -> Result<Vec<User>>;

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn create_user(&self, username: &str) -> Result<User>;

    /// A user's server, or `None` if no server with that name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn get_server(&self, username: &str, servername: &str) -> Result<Option<Server>> {
        Ok(self
            .get_user(username)
            .await?
            .and_then(|mut user| user.servers.remove(servername)))
    }

    /// Ask the Hub to spawn a server.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::UserNotFound` if the user doesn't exist and
    /// `ServerError::AlreadyExists` if the server is already running.
    async fn start_server(
        &self,
        username: &str,
        servername: &str,
        options: &XnatUserOptions,
    ) -> Result<()>;

    /// Ask the Hub to stop and remove a server. A missing server is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn stop_server(&self, username: &str, servername: &str) -> Result<()>;

    /// Issue an API token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn create_token(&self, username: &str, token: &Token) -> Result<Token>;
}

/// Label used in log lines and error messages for a server.
#[must_use]
pub fn server_label(username: &str, servername: &str) -> String {
    if servername.is_empty() {
        username.to_string()
    } else {
        format!("{username}/{servername}")
    }
}

/// HTTP client for the Hub REST API.
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

/// Error body returned by the Hub.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl HttpHubClient {
    /// Create a client for the Hub API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url, token))
    }

    /// Create a client around a pre-configured reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Base URL of the Hub API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn server_url(&self, username: &str, servername: &str) -> String {
        if servername.is_empty() {
            format!("{}/users/{username}/server", self.base_url)
        } else {
            format!("{}/users/{username}/servers/{servername}", self.base_url)
        }
    }

    fn authorized(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, format!("token {}", self.token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| ServerError::HubUnreachable(e.to_string()))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to parse Hub response: {e}")))
    }

    async fn hub_error(response: Response) -> ServerError {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("Hub returned status {status}"));
        ServerError::Hub {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn get_version(&self) -> Result<Hub> {
        let url = format!("{}/", self.base_url);
        let response = self.send(self.client.get(&url)).await?;

        if response.status().is_success() {
            Self::parse(response).await
        } else {
            let status = response.status();
            tracing::error!(status = %status, "Hub version check failed");
            Err(ServerError::HubUnreachable(format!(
                "version check returned {status}"
            )))
        }
    }

    async fn get_info(&self) -> Result<Hub> {
        let url = format!("{}/info", self.base_url);
        let response = self.send(self.authorized(Method::GET, &url)).await?;

        let status = response.status();
        if status.is_success() {
            Self::parse(response).await
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::error!(status = %status, "Hub rejected the API token");
            Err(ServerError::HubUnreachable(format!(
                "Hub rejected the API token ({status})"
            )))
        } else {
            Err(Self::hub_error(response).await)
        }
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let url = format!("{}/users/{username}", self.base_url);
        let response = self.send(self.authorized(Method::GET, &url)).await?;

        if response.status().is_success() {
            Self::parse(response).await.map(Some)
        } else if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(username = %username, "Hub user not found");
            Ok(None)
        } else {
            Err(Self::hub_error(response).await)
        }
    }

    async fn get_users(&self) -> Result<Vec<User>> {
        let url = format!("{}/users", self.base_url);
        let response = self.send(self.authorized(Method::GET, &url)).await?;

        if response.status().is_success() {
            Self::parse(response).await
        } else {
            Err(Self::hub_error(response).await)
        }
    }

    async fn create_user(&self, username: &str) -> Result<User> {
        let url = format!("{}/users/{username}", self.base_url);
        let response = self.send(self.authorized(Method::POST, &url)).await?;

        if response.status().is_success() {
            tracing::info!(username = %username, "Created Hub user");
            Self::parse(response).await
        } else {
            let error = Self::hub_error(response).await;
            tracing::error!(username = %username, error = %error, "Failed to create Hub user");
            Err(error)
        }
    }

    async fn start_server(
        &self,
        username: &str,
        servername: &str,
        options: &XnatUserOptions,
    ) -> Result<()> {
        let label = server_label(username, servername);
        let user = self
            .get_user(username)
            .await?
            .ok_or_else(|| ServerError::UserNotFound(username.to_string()))?;

        if user.server(servername).is_some() {
            tracing::error!(server = %label, "Cannot start server, it is already running");
            return Err(ServerError::AlreadyExists(label));
        }

        let url = self.server_url(username, servername);
        let response = self
            .send(self.authorized(Method::POST, &url).json(options))
            .await?;

        if response.status().is_success() {
            tracing::debug!(server = %label, "Sent start request to Hub");
            Ok(())
        } else {
            let error = Self::hub_error(response).await;
            tracing::error!(server = %label, error = %error, "Failed to start server");
            Err(error)
        }
    }

    async fn stop_server(&self, username: &str, servername: &str) -> Result<()> {
        let label = server_label(username, servername);
        let url = self.server_url(username, servername);
        let response = self
            .send(
                self.authorized(Method::DELETE, &url)
                    .json(&serde_json::json!({ "remove": true })),
            )
            .await?;

        if response.status().is_success() {
            tracing::debug!(server = %label, "Sent stop request to Hub");
            Ok(())
        } else if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(server = %label, "Server not found, nothing to stop");
            Ok(())
        } else {
            let error = Self::hub_error(response).await;
            tracing::error!(server = %label, error = %error, "Failed to stop server");
            Err(error)
        }
    }

    async fn create_token(&self, username: &str, token: &Token) -> Result<Token> {
        let url = format!("{}/users/{username}/tokens", self.base_url);
        let response = self
            .send(self.authorized(Method::POST, &url).json(token))
            .await?;

        if response.status().is_success() {
            Self::parse(response).await
        } else {
            Err(Self::hub_error(response).await)
        }
    }
}

/// In-memory Hub for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::{server_label, HubClient};
    use crate::error::{Result, ServerError};
    use crate::types::{Hub, Server, Token, User, XnatUserOptions};

    #[derive(Debug, Default)]
    struct MockState {
        users: BTreeMap<String, User>,
        offline: bool,
        unauthorized: bool,
        spawn_never_ready: bool,
        stop_never_completes: bool,
        start_calls: Vec<(String, String, XnatUserOptions)>,
        stop_calls: Vec<(String, String)>,
    }

    /// A Hub held in memory.
    ///
    /// Started servers are ready immediately and stopped servers vanish
    /// immediately unless told otherwise.
    #[derive(Debug, Default)]
    pub struct MockHubClient {
        state: Mutex<MockState>,
    }

    impl MockHubClient {
        /// Create an empty Hub.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail as if the Hub were down.
        pub fn set_offline(&self, offline: bool) {
            self.state.lock().offline = offline;
        }

        /// Make authenticated calls fail as if the token were wrong.
        pub fn set_unauthorized(&self, unauthorized: bool) {
            self.state.lock().unauthorized = unauthorized;
        }

        /// Keep spawned servers pending forever.
        pub fn set_spawn_never_ready(&self, value: bool) {
            self.state.lock().spawn_never_ready = value;
        }

        /// Keep stopped servers around forever.
        pub fn set_stop_never_completes(&self, value: bool) {
            self.state.lock().stop_never_completes = value;
        }

        /// Add a user.
        pub fn insert_user(&self, username: &str) {
            self.state
                .lock()
                .users
                .entry(username.to_string())
                .or_insert_with(|| User {
                    name: username.to_string(),
                    ..User::default()
                });
        }

        /// Add a server, creating its user if needed.
        pub fn insert_server(&self, username: &str, servername: &str, server: Server) {
            self.insert_user(username);
            if let Some(user) = self.state.lock().users.get_mut(username) {
                user.servers.insert(servername.to_string(), server);
            }
        }

        /// Whether a user exists.
        #[must_use]
        pub fn has_user(&self, username: &str) -> bool {
            self.state.lock().users.contains_key(username)
        }

        /// Start requests received, in order.
        #[must_use]
        pub fn start_calls(&self) -> Vec<(String, String, XnatUserOptions)> {
            self.state.lock().start_calls.clone()
        }

        /// Stop requests received, in order.
        #[must_use]
        pub fn stop_calls(&self) -> Vec<(String, String)> {
            self.state.lock().stop_calls.clone()
        }

        fn check(&self, authenticated: bool) -> Result<()> {
            let state = self.state.lock();
            if state.offline {
                return Err(ServerError::HubUnreachable("connection refused".into()));
            }
            if authenticated && state.unauthorized {
                return Err(ServerError::HubUnreachable(
                    "Hub rejected the API token (403 Forbidden)".into(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl HubClient for MockHubClient {
        async fn get_version(&self) -> Result<Hub> {
            self.check(false)?;
            Ok(Hub {
                version: "4.1.0".into(),
                ..Hub::default()
            })
        }

        async fn get_info(&self) -> Result<Hub> {
            self.check(true)?;
            Ok(Hub {
                version: "4.1.0".into(),
                python: Some("3.11.4".into()),
                ..Hub::default()
            })
        }

        async fn get_user(&self, username: &str) -> Result<Option<User>> {
            self.check(true)?;
            Ok(self.state.lock().users.get(username).cloned())
        }

        async fn get_users(&self) -> Result<Vec<User>> {
            self.check(true)?;
            Ok(self.state.lock().users.values().cloned().collect())
        }

        async fn create_user(&self, username: &str) -> Result<User> {
            self.check(true)?;
            self.insert_user(username);
            self.get_user(username)
                .await?
                .ok_or_else(|| ServerError::UserNotFound(username.to_string()))
        }

        async fn start_server(
            &self,
            username: &str,
            servername: &str,
            options: &XnatUserOptions,
        ) -> Result<()> {
            self.check(true)?;
            let mut state = self.state.lock();
            state.start_calls.push((
                username.to_string(),
                servername.to_string(),
                options.clone(),
            ));

            let ready = !state.spawn_never_ready;
            let user = state
                .users
                .get_mut(username)
                .ok_or_else(|| ServerError::UserNotFound(username.to_string()))?;
            if user.servers.contains_key(servername) {
                return Err(ServerError::AlreadyExists(server_label(username, servername)));
            }

            let now = Utc::now();
            user.servers.insert(
                servername.to_string(),
                Server {
                    name: servername.to_string(),
                    ready,
                    pending: (!ready).then(|| "spawn".to_string()),
                    url: format!("/jupyterhub/user/{username}/{servername}"),
                    started: Some(now),
                    last_activity: Some(now),
                    ..Server::default()
                },
            );
            Ok(())
        }

        async fn stop_server(&self, username: &str, servername: &str) -> Result<()> {
            self.check(true)?;
            let mut state = self.state.lock();
            state
                .stop_calls
                .push((username.to_string(), servername.to_string()));

            if state.stop_never_completes {
                return Ok(());
            }
            if let Some(user) = state.users.get_mut(username) {
                user.servers.remove(servername);
            }
            Ok(())
        }

        async fn create_token(&self, username: &str, token: &Token) -> Result<Token> {
            self.check(true)?;
            Ok(Token {
                token: Some(format!("{username}-token")),
                user: Some(username.to_string()),
                created: Some(Utc::now()),
                ..token.clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use xnat_jupyter_core::UserId;

    async fn setup() -> (MockServer, HttpHubClient) {
        let server = MockServer::start().await;
        let client = HttpHubClient::new(format!("{}/hub/api", server.uri()), "secret").unwrap();
        (server, client)
    }

    fn options() -> XnatUserOptions {
        XnatUserOptions {
            user_id: UserId::new(1),
            xsi_type: "xnat:projectData".into(),
            item_id: "p1".into(),
            item_label: "p1".into(),
            project_id: "p1".into(),
            event_tracking_id: "t1".into(),
        }
    }

    #[test]
    fn server_urls() {
        let client = HttpHubClient::new("http://hub/api/", "t").unwrap();
        assert_eq!(client.base_url(), "http://hub/api");
        assert_eq!(client.server_url("andy", ""), "http://hub/api/users/andy/server");
        assert_eq!(
            client.server_url("andy", "lab"),
            "http://hub/api/users/andy/servers/lab"
        );
    }

    #[tokio::test]
    async fn get_info_sends_token_header() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/info"))
            .and(header("authorization", "token secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "version": "4.1.0", "python": "3.11" })),
            )
            .mount(&server)
            .await;

        let hub = client.get_info().await.unwrap();
        assert_eq!(hub.version, "4.1.0");
        assert_eq!(hub.python.as_deref(), Some("3.11"));
    }

    #[tokio::test]
    async fn rejected_token_is_unreachable() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/info"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(matches!(
            client.get_info().await,
            Err(ServerError::HubUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn missing_user_is_none() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(client.get_user("ghost").await.unwrap().is_none());
        assert!(client.get_server("ghost", "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_refuses_running_server() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/andy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "andy",
                "servers": { "": { "name": "", "ready": true, "url": "/user/andy/" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/andy/server"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        assert!(matches!(
            client.start_server("andy", "", &options()).await,
            Err(ServerError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn start_posts_user_options() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/andy"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "andy" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hub/api/users/andy/servers/lab"))
            .and(body_json(serde_json::to_value(options()).unwrap()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client.start_server("andy", "lab", &options()).await.unwrap();
    }

    #[tokio::test]
    async fn start_for_unknown_user_fails() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/hub/api/users/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(matches!(
            client.start_server("ghost", "", &options()).await,
            Err(ServerError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_ignores_missing_server() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/hub/api/users/andy/server"))
            .and(body_json(serde_json::json!({ "remove": true })))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        client.stop_server("andy", "").await.unwrap();
    }

    #[tokio::test]
    async fn stop_surfaces_hub_errors() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/hub/api/users/andy/server"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({ "status": 500, "message": "boom" })),
            )
            .mount(&server)
            .await;

        match client.stop_server("andy", "").await {
            Err(ServerError::Hub { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_hub() {
        let client = HttpHubClient::new("http://127.0.0.1:1/hub/api", "t").unwrap();
        assert!(matches!(
            client.get_version().await,
            Err(ServerError::HubUnreachable(_))
        ));
    }
}
