//! Starting and stopping notebook servers.
//!
//! [`ServerLifecycleOrchestrator::start_server`] does everything that can be
//! refused up front on the caller's path: request validation, the read
//! permission check, compute availability, Hub probes, the duplicate-server
//! guard and saving the launch record. Submitting to the Hub and waiting for
//! the server happen later on the worker queue, so the caller learns only that
//! the request was accepted. Progress and the final outcome land in the event
//! log under the request's tracking id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use xnat_jupyter_core::{ConfigId, TrackingId, UserId, XnatUser};
use xnat_jupyter_store::Store;

use crate::config::HubPreferences;
use crate::cull::Culler;
use crate::error::{Result, ServerError};
use crate::events::{EventContext, EventSink};
use crate::hub::{server_label, HubClient};
use crate::jobs::{JobDispatcher, ServerJob, StartJob, StopJob};
use crate::lifecycle::{ServerKey, ServerState, ServerStateTable};
use crate::types::{Hub, Server, Token, User, XnatUserOptions};
use crate::user_options::{Launch, UserOptionsService};

const START_FAILED: &str = "Failed to launch Jupyter notebook server.";

const HUB_OFFLINE: &str = "Failed to connect to JupyterHub. Please ensure the following:\n\
    (1) JupyterHub is running \n\
    (2) Verify the correct API URL is set in the plugin settings.";

const HUB_UNAUTHORIZED: &str = "Failed to connect to JupyterHub. Please check the following: \n\
    (1) Ensure that JupyterHub is running. \n\
    (2) Verify the correct API URL is set in the plugin settings. \n\
    (3) Confirm XNATs token for authenticating with JupyterHub is correctly set in both the \
    plugin settings and JupyterHub configuration.";

/// A request to launch a notebook server on an XNAT item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStartRequest {
    /// Must match the requesting user.
    pub username: String,
    /// Server name, empty for the default server.
    #[serde(default)]
    pub servername: String,
    /// XNAT data type of the item.
    pub xsi_type: String,
    /// Item id.
    pub item_id: String,
    /// Item label.
    pub item_label: String,
    /// Owning project.
    pub project_id: String,
    /// Caller-chosen id to follow the request's progress by.
    pub event_tracking_id: String,
    /// Compute environment config.
    pub compute_environment_config_id: Option<ConfigId>,
    /// Hardware config.
    pub hardware_config_id: Option<ConfigId>,
    /// Dashboard config, when launching a dashboard.
    #[serde(default)]
    pub dashboard_config_id: Option<ConfigId>,
}

impl ServerStartRequest {
    /// Check every field and turn the request into a [`Launch`].
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Validation` listing every problem found.
    pub fn validate(&self, user: &XnatUser) -> Result<Launch> {
        let mut errors = Vec::new();

        if self.username != user.username {
            errors.push("Usernames do not match".to_string());
        }
        let required = [
            (&self.username, "Username cannot be blank"),
            (&self.xsi_type, "XSI type cannot be blank"),
            (&self.item_id, "Item ID cannot be blank"),
            (&self.item_label, "Item label cannot be blank"),
            (&self.project_id, "Project ID cannot be blank"),
        ];
        errors.extend(
            required
                .iter()
                .filter(|(value, _)| value.trim().is_empty())
                .map(|(_, message)| (*message).to_string()),
        );
        let tracking_id = self.event_tracking_id.parse::<TrackingId>().ok();
        if tracking_id.is_none() {
            errors.push("Event tracking ID cannot be blank".to_string());
        }
        if self.compute_environment_config_id.is_none() {
            errors.push("Compute environment config ID cannot be null".to_string());
        }
        if self.hardware_config_id.is_none() {
            errors.push("Hardware config ID cannot be null".to_string());
        }

        match (
            tracking_id,
            self.compute_environment_config_id,
            self.hardware_config_id,
        ) {
            (Some(tracking_id), Some(environment), Some(hardware)) if errors.is_empty() => {
                Ok(Launch {
                    servername: self.servername.clone(),
                    xsi_type: self.xsi_type.clone(),
                    item_id: self.item_id.clone(),
                    item_label: self.item_label.clone(),
                    project_id: self.project_id.clone(),
                    environment,
                    hardware,
                    dashboard: self.dashboard_config_id,
                    tracking_id,
                })
            }
            _ => Err(ServerError::Validation(errors)),
        }
    }
}

/// Claims servers for stopping and queues the stop.
///
/// Shared by user-initiated stops and the cull sweeps.
pub struct StopController {
    events: Arc<dyn EventSink>,
    states: Arc<ServerStateTable>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl Clone for StopController {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            states: Arc::clone(&self.states),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl StopController {
    /// Create a stop controller.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventSink>,
        states: Arc<ServerStateTable>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            events,
            states,
            dispatcher,
        }
    }

    /// Queue a stop for `username`'s server. Stopping a server the Hub does not
    /// know about completes normally.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::OperationInProgress` if the server is mid start
    /// or stop, or `ServerError::QueueFull` if the job cannot be queued.
    pub async fn stop_server(
        &self,
        user_id: Option<UserId>,
        username: &str,
        servername: &str,
        tracking_id: TrackingId,
    ) -> Result<()> {
        let context = EventContext::stop(tracking_id, user_id);
        self.events
            .publish(context.progress(0, "Stopping Jupyter Notebook Server."));

        let claim = match self
            .states
            .begin(ServerKey::new(username, servername), ServerState::Stopping)
        {
            Ok(claim) => claim,
            Err(e) => {
                self.events
                    .publish(context.failed(format!("Failed to stop Jupyter Server. {e}")));
                return Err(e);
            }
        };

        tracing::info!(
            server = %server_label(username, servername),
            tracking_id = %context.tracking_id,
            "Queueing stop"
        );

        let job = ServerJob::Stop(StopJob {
            claim,
            context: context.clone(),
        });
        if let Err(e) = self.dispatcher.dispatch(job).await {
            self.events
                .publish(context.failed(format!("Failed to stop Jupyter Server. {e}")));
            return Err(e);
        }
        Ok(())
    }
}

/// Front door for notebook server lifecycle and Hub queries.
pub struct ServerLifecycleOrchestrator<S: Store> {
    hub: Arc<dyn HubClient>,
    events: Arc<dyn EventSink>,
    states: Arc<ServerStateTable>,
    dispatcher: Arc<dyn JobDispatcher>,
    user_options: UserOptionsService<S>,
    stopper: StopController,
}

impl<S: Store> Clone for ServerLifecycleOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            events: Arc::clone(&self.events),
            states: Arc::clone(&self.states),
            dispatcher: Arc::clone(&self.dispatcher),
            user_options: self.user_options.clone(),
            stopper: self.stopper.clone(),
        }
    }
}

impl<S: Store> ServerLifecycleOrchestrator<S> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        hub: Arc<dyn HubClient>,
        events: Arc<dyn EventSink>,
        states: Arc<ServerStateTable>,
        dispatcher: Arc<dyn JobDispatcher>,
        user_options: UserOptionsService<S>,
    ) -> Self {
        let stopper = StopController::new(
            Arc::clone(&events),
            Arc::clone(&states),
            Arc::clone(&dispatcher),
        );
        Self {
            hub,
            events,
            states,
            dispatcher,
            user_options,
            stopper,
        }
    }

    /// The stop path, for the cull sweeps.
    #[must_use]
    pub const fn stopper(&self) -> &StopController {
        &self.stopper
    }

    /// A culler that claims servers in this orchestrator's state table, so a
    /// sweep never overlaps a start or stop in flight here.
    #[must_use]
    pub fn culler(&self, preferences: Arc<HubPreferences>) -> Culler {
        Culler::new(Arc::clone(&self.hub), self.stopper.clone(), preferences)
    }

    /// The launch record service.
    #[must_use]
    pub const fn user_options(&self) -> &UserOptionsService<S> {
        &self.user_options
    }

    /// Lifecycle state of a server as seen by this process.
    #[must_use]
    pub fn server_state(&self, username: &str, servername: &str) -> ServerState {
        self.states.state(&ServerKey::new(username, servername))
    }

    /// Hub version. Needs no token.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::HubUnreachable` if the Hub cannot be reached.
    pub async fn get_version(&self) -> Result<Hub> {
        self.hub.get_version().await
    }

    /// Hub build details. Needs a valid token.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::HubUnreachable` if the Hub cannot be reached or
    /// rejects the token.
    pub async fn get_info(&self) -> Result<Hub> {
        self.hub.get_info().await
    }

    /// Create the Hub user matching `user`.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub call fails.
    pub async fn create_user(&self, user: &XnatUser) -> Result<User> {
        tracing::info!(username = %user.username, "Creating JupyterHub user");
        self.hub.create_user(&user.username).await
    }

    /// The Hub user matching `user`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub call fails.
    pub async fn get_user(&self, user: &XnatUser) -> Result<Option<User>> {
        self.hub.get_user(&user.username).await
    }

    /// Every Hub user.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub call fails.
    pub async fn get_users(&self) -> Result<Vec<User>> {
        self.hub.get_users().await
    }

    /// One of `user`'s servers, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub call fails.
    pub async fn get_server(&self, user: &XnatUser, servername: &str) -> Result<Option<Server>> {
        self.hub.get_server(&user.username, servername).await
    }

    /// Issue a Hub token that can reach only `user`'s servers.
    ///
    /// The returned token is the only copy of its secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the Hub call fails.
    pub async fn create_token(
        &self,
        user: &XnatUser,
        note: impl Into<String>,
        expires_in: Option<u64>,
    ) -> Result<Token> {
        let request = Token {
            note: Some(note.into()),
            expires_in,
            scopes: vec![format!("access:servers!user={}", user.username)],
            ..Token::default()
        };
        tracing::debug!(username = %user.username, "Creating JupyterHub token");
        self.hub.create_token(&user.username, &request).await
    }

    /// Accept a start request and queue the launch.
    ///
    /// Returns once the start has been queued. Errors returned here are also
    /// recorded as a `Failed` event when the request carried a tracking id.
    ///
    /// # Errors
    ///
    /// - `ServerError::Validation` if the request is malformed
    /// - `ServerError::PermissionDenied` if the user cannot read the item
    /// - `ServerError::Unavailable` if the compute pair is not offered to the user
    /// - `ServerError::HubUnreachable` if the Hub is down or rejects the token
    /// - `ServerError::AlreadyExists` if the server is already running
    /// - `ServerError::OperationInProgress` if the server is mid start or stop
    /// - `ServerError::QueueFull` if the launch cannot be queued
    pub async fn start_server(
        &self,
        user: &XnatUser,
        request: &ServerStartRequest,
    ) -> Result<TrackingId> {
        let launch = match request.validate(user) {
            Ok(launch) => launch,
            Err(e) => {
                if let Ok(tracking_id) = request.event_tracking_id.parse() {
                    let context = EventContext::start(
                        tracking_id,
                        user.id,
                        request.xsi_type.as_str(),
                        request.item_id.as_str(),
                    );
                    self.events
                        .publish(context.failed(format!("{START_FAILED} {e}")));
                }
                return Err(e);
            }
        };

        let context = EventContext::start(
            launch.tracking_id.clone(),
            user.id,
            launch.xsi_type.as_str(),
            launch.item_id.as_str(),
        );
        let fail = |message: String, error: ServerError| {
            tracing::warn!(
                username = %user.username,
                servername = %launch.servername,
                tracking_id = %launch.tracking_id,
                error = %error,
                "Start refused"
            );
            self.events.publish(context.failed(message));
            error
        };

        self.events.publish(context.progress(
            0,
            format!("Starting Jupyter notebook server for user {}", user.username),
        ));

        if !self.user_options.can_read(user, &launch) {
            let message = format!(
                "{START_FAILED} Permission denied to read {} {} in project {}",
                launch.xsi_type, launch.item_id, launch.project_id
            );
            return Err(fail(message.clone(), ServerError::PermissionDenied(message)));
        }

        match self.user_options.is_available(user, &launch) {
            Ok(true) => {}
            Ok(false) => {
                let message = format!(
                    "{START_FAILED} The compute environment or hardware configuration is not \
                     available to the user."
                );
                return Err(fail(message.clone(), ServerError::Unavailable(message)));
            }
            Err(e) => return Err(fail(format!("{START_FAILED} {e}"), e)),
        }

        let key = ServerKey::new(user.username.as_str(), launch.servername.as_str());
        let claim = self
            .states
            .begin(key, ServerState::Starting)
            .map_err(|e| fail(format!("{START_FAILED} {e}"), e))?;

        if let Err(e) = self.hub.get_version().await {
            return Err(fail(HUB_OFFLINE.to_string(), e));
        }
        if let Err(e) = self.hub.get_info().await {
            return Err(fail(HUB_UNAUTHORIZED.to_string(), e));
        }

        self.events
            .publish(context.progress(0, "Checking for existing Jupyter notebook servers."));

        let hub_user = match self.hub.get_user(&user.username).await {
            Ok(Some(hub_user)) => hub_user,
            Ok(None) => self
                .create_user(user)
                .await
                .map_err(|e| fail(format!("{START_FAILED} {e}"), e))?,
            Err(e) => return Err(fail(format!("{START_FAILED} {e}"), e)),
        };
        if hub_user.servers.contains_key(&launch.servername) {
            let message = format!(
                "{START_FAILED} There is already one running. Please stop the running server \
                 before starting a new one."
            );
            return Err(fail(
                message,
                ServerError::AlreadyExists(server_label(&user.username, &launch.servername)),
            ));
        }

        self.events.publish(
            context.progress(20, "Building notebook server container configuration."),
        );
        self.user_options
            .store_user_options(user, &launch)
            .map_err(|e| fail(format!("{START_FAILED} {e}"), e))?;
        self.events.publish(context.progress(
            30,
            "Saved container configuration. Sending start request to JupyterHub.",
        ));

        let job = ServerJob::Start(StartJob {
            claim,
            context: context.clone(),
            options: XnatUserOptions {
                user_id: user.id,
                xsi_type: launch.xsi_type.clone(),
                item_id: launch.item_id.clone(),
                item_label: launch.item_label.clone(),
                project_id: launch.project_id.clone(),
                event_tracking_id: launch.tracking_id.to_string(),
            },
        });
        self.dispatcher
            .dispatch(job)
            .await
            .map_err(|e| fail(format!("{START_FAILED} {e}"), e))?;

        tracing::info!(
            username = %user.username,
            servername = %launch.servername,
            tracking_id = %launch.tracking_id,
            "Queued server start"
        );
        Ok(launch.tracking_id)
    }

    /// Queue a stop of one of `user`'s servers.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::OperationInProgress` if the server is mid start
    /// or stop, or `ServerError::QueueFull` if the job cannot be queued.
    pub async fn stop_server(
        &self,
        user: &XnatUser,
        servername: &str,
        tracking_id: TrackingId,
    ) -> Result<()> {
        self.stopper
            .stop_server(Some(user.id), &user.username, servername, tracking_id)
            .await
    }
}
