//! JupyterHub notebook server lifecycle for XNAT.
//!
//! This crate launches single-user notebook servers on a `JupyterHub` against
//! XNAT data items and tears them down again. It handles:
//!
//! - Start requests: validation, read permission, compute availability, Hub
//!   probes and the duplicate-server guard
//! - Launch records: the resolved container template plus workspace and
//!   archive mounts, saved for the Hub spawner to fetch
//! - Background submit and poll jobs on a bounded worker queue
//! - Per-request event logs, readable in time order
//! - Sweeps that stop idle and long-running servers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  ServerLifecycleOrchestrator                    │
//! │  ┌─────────────┐ ┌──────────────────┐ ┌──────────────────────┐  │
//! │  │ Validation  │ │ UserOptions      │ │ ServerStateTable     │  │
//! │  │ + checks    │ │ (resolve, mount) │ │ (in-flight guard)    │  │
//! │  └─────────────┘ └──────────────────┘ └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!             │ StartJob / StopJob              ▲ StopController
//!             ▼                                 │
//! ┌──────────────────────────────┐     ┌─────────────────┐
//! │ WorkerPool ── JobExecutor    │     │     Culler      │
//! └──────────────────────────────┘     └─────────────────┘
//!             │ submit / poll                   │ list users
//!             ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  HubClient (JupyterHub REST API)                │
//! └─────────────────────────────────────────────────────────────────┘
//!
//!   every step ──▶ EventSink ──▶ EventTracker (sorted EventTrackingLog)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xnat_jupyter_core::{UserId, XnatUser};
//! use xnat_jupyter_server::{
//!     ArchiveLocator, CredentialIssuer, EventSink, EventTracker, HttpHubClient, HubClient,
//!     HubPreferences, JobExecutor, PermissionChecker, ServerLifecycleOrchestrator,
//!     ServerStartRequest, ServerStateTable, UserOptionsService, WorkerPool,
//! };
//! use xnat_jupyter_store::RocksStore;
//!
//! # async fn example(
//! #     permissions: Arc<dyn PermissionChecker>,
//! #     archive: Arc<dyn ArchiveLocator>,
//! #     credentials: Arc<dyn CredentialIssuer>,
//! #     request: ServerStartRequest,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let prefs = Arc::new(HubPreferences::from_env());
//! let store = Arc::new(RocksStore::open("/var/lib/xnat-jupyter")?);
//! let hub: Arc<dyn HubClient> = Arc::new(HttpHubClient::new(
//!     prefs.jupyterhub_api_url.as_str(),
//!     prefs.jupyterhub_token.as_str(),
//! )?);
//! let tracker = Arc::new(EventTracker::new());
//! let events: Arc<dyn EventSink> = tracker.clone();
//!
//! let executor = Arc::new(JobExecutor::new(hub.clone(), events.clone(), prefs.clone()));
//! let (dispatcher, _pool) = WorkerPool::spawn(executor, prefs.worker_count, prefs.queue_capacity);
//!
//! let user_options =
//!     UserOptionsService::new(store, permissions, archive, credentials, prefs.clone());
//! let orchestrator = ServerLifecycleOrchestrator::new(
//!     hub,
//!     events,
//!     Arc::new(ServerStateTable::new()),
//!     Arc::new(dispatcher),
//!     user_options,
//! );
//!
//! let user = XnatUser::new(UserId::new(3), "andy");
//! let tracking_id = orchestrator.start_server(&user, &request).await?;
//!
//! // Later
//! if let Some(tracked) = tracker.get(&tracking_id) {
//!     println!("{:?}", tracked.log.latest());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature for an in-memory Hub, a recording event
//! sink and fixed XNAT collaborators:
//!
//! ```ignore
//! use xnat_jupyter_server::{MockHubClient, RecordingSink, StaticPermissions};
//!
//! let hub = MockHubClient::new();
//! hub.insert_user("andy");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collaborators;
pub mod config;
pub mod cull;
pub mod error;
pub mod events;
pub mod hub;
pub mod jobs;
pub mod lifecycle;
pub mod orchestrator;
pub mod types;
pub mod user_options;

pub use collaborators::{ArchiveItem, ArchiveLocator, CredentialIssuer, Credentials, PermissionChecker};
pub use config::HubPreferences;
pub use cull::{CullKind, Culler};
pub use error::{Result, ServerError};
pub use events::{
    EventContext, EventSink, EventStatus, EventTracker, EventTrackingLog, LogEntry, Operation,
    ServerEvent, TrackedOperation,
};
pub use hub::{server_label, HttpHubClient, HubClient};
pub use jobs::{
    ImmediateDispatcher, JobDispatcher, JobExecutor, QueueDispatcher, ServerJob, StartJob,
    StopJob, WorkerPool,
};
pub use lifecycle::{InFlight, ServerKey, ServerState, ServerStateTable};
pub use orchestrator::{ServerLifecycleOrchestrator, ServerStartRequest, StopController};
pub use types::{Hub, Server, Token, User, XnatUserOptions};
pub use user_options::{Launch, UserOptionsService};

#[cfg(any(test, feature = "test-utils"))]
pub use collaborators::mock::{StaticArchive, StaticCredentials, StaticPermissions};
#[cfg(any(test, feature = "test-utils"))]
pub use events::mock::RecordingSink;
#[cfg(any(test, feature = "test-utils"))]
pub use hub::mock::MockHubClient;
