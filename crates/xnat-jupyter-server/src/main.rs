//! XNAT `JupyterHub` server daemon.
//!
//! Runs the background side of the notebook server lifecycle: the worker pool
//! that drives stops against the Hub, the periodic cull sweeps, and an HTTP
//! view of per-request event logs.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check, probes the Hub
//!
//! ## Events
//! - `GET /v1/events/:tracking_id` - Event log of a start or stop request

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xnat_jupyter_core::TrackingId;
use xnat_jupyter_server::{
    Culler, EventSink, EventTracker, HttpHubClient, HubClient, HubPreferences, JobExecutor,
    ServerStateTable, StopController, WorkerPool,
};

/// Application state shared across handlers.
struct AppState {
    hub: Arc<dyn HubClient>,
    tracker: Arc<EventTracker>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "xnat-jupyter-server",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.get_version().await {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "JupyterHub not reachable");
            (StatusCode::SERVICE_UNAVAILABLE, "JupyterHub unreachable").into_response()
        }
    }
}

// ============================================================================
// Event Endpoints
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Get the event log of a request.
///
/// GET /v1/events/:tracking_id
async fn events_handler(
    State(state): State<AppState>,
    Path(tracking_id): Path<String>,
) -> impl IntoResponse {
    let tracking_id = match tracking_id.parse::<TrackingId>() {
        Ok(id) => id,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("Invalid tracking ID: {e}"), 400)),
            )
                .into_response();
        }
    };

    match state.tracker.get(&tracking_id) {
        Some(tracked) => Json(tracked).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("No events for tracking ID", 404)),
        )
            .into_response(),
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Events
        .route("/v1/events/:tracking_id", get(events_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xnat_jupyter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting XNAT JupyterHub server daemon");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let preferences = Arc::new(HubPreferences::from_env());

    tracing::info!(
        jupyterhub_api_url = %preferences.jupyterhub_api_url,
        site_url = %preferences.site_url,
        workers = preferences.worker_count,
        queue_capacity = preferences.queue_capacity,
        "Loaded hub preferences"
    );

    let hub: Arc<dyn HubClient> = Arc::new(HttpHubClient::new(
        preferences.jupyterhub_api_url.as_str(),
        preferences.jupyterhub_token.as_str(),
    )?);
    let tracker = Arc::new(EventTracker::with_retention(
        preferences.event_retention(),
        preferences.event_capacity,
    ));
    let events: Arc<dyn EventSink> = Arc::clone(&tracker) as Arc<dyn EventSink>;

    // Worker pool for queued stops
    let executor = Arc::new(JobExecutor::new(
        Arc::clone(&hub),
        Arc::clone(&events),
        Arc::clone(&preferences),
    ));
    let (dispatcher, pool) = WorkerPool::spawn(
        executor,
        preferences.worker_count,
        preferences.queue_capacity,
    );
    tracing::info!(workers = pool.len(), "Started worker pool");

    // Start the cull sweeps as a background task. This process runs no
    // orchestrator, so its state table only guards against overlapping culls.
    // An application embedding the orchestrator should run
    // `ServerLifecycleOrchestrator::culler` instead, which shares its table.
    let stopper = StopController::new(
        events,
        Arc::new(ServerStateTable::new()),
        Arc::new(dispatcher),
    );
    let culler = Culler::new(Arc::clone(&hub), stopper, Arc::clone(&preferences));
    tokio::spawn(async move {
        culler.run().await;
    });
    tracing::info!("Started cull loop");

    // Create app state
    let state = AppState { hub, tracker };

    // Create router
    let app = create_router(state);

    // Start server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
