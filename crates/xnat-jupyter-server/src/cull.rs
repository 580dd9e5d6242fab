//! Periodic sweeps that stop idle and long-running servers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use xnat_jupyter_core::TrackingId;

use crate::config::HubPreferences;
use crate::hub::{server_label, HubClient};
use crate::orchestrator::StopController;
use crate::types::Server;

/// Which sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullKind {
    /// No activity for longer than the inactivity timeout.
    Inactive,
    /// Running for longer than the maximum lifetime.
    LongRunning,
}

impl CullKind {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Inactive => "cullIdleServers",
            Self::LongRunning => "cullLongRunningServers",
        }
    }
}

/// Stops servers that have outlived their welcome.
pub struct Culler {
    hub: Arc<dyn HubClient>,
    stopper: StopController,
    preferences: Arc<HubPreferences>,
}

impl Culler {
    /// Create a culler.
    #[must_use]
    pub fn new(
        hub: Arc<dyn HubClient>,
        stopper: StopController,
        preferences: Arc<HubPreferences>,
    ) -> Self {
        Self {
            hub,
            stopper,
            preferences,
        }
    }

    /// Stop every server idle for more than the inactivity timeout.
    ///
    /// Returns the number of stops queued. Does nothing when the timeout is 0.
    pub async fn cull_inactive(&self) -> usize {
        let timeout = self.preferences.inactivity_timeout_minutes;
        if timeout <= 0 {
            tracing::debug!("Not culling idle servers");
            return 0;
        }
        tracing::debug!(timeout_minutes = timeout, "Culling idle servers");

        self.sweep(CullKind::Inactive, |server, now| {
            server
                .last_activity
                .is_some_and(|at| (now - at).num_minutes() > timeout)
        })
        .await
    }

    /// Stop every server running for more than the maximum lifetime.
    ///
    /// Returns the number of stops queued. Does nothing when the lifetime is 0.
    pub async fn cull_long_running(&self) -> usize {
        let lifetime = self.preferences.max_server_lifetime_hours;
        if lifetime <= 0 {
            tracing::debug!("Not culling long running servers");
            return 0;
        }
        tracing::debug!(lifetime_hours = lifetime, "Culling long running servers");

        let max_age = chrono::Duration::hours(lifetime);
        self.sweep(CullKind::LongRunning, |server, now| {
            server.started.is_some_and(|at| now - at > max_age)
        })
        .await
    }

    async fn sweep<F>(&self, kind: CullKind, expired: F) -> usize
    where
        F: Fn(&Server, DateTime<Utc>) -> bool + Send + Sync,
    {
        let users = match self.hub.get_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(kind = ?kind, error = %e, "Cull sweep skipped, cannot list users");
                return 0;
            }
        };

        let now = Utc::now();
        let tracking_id = match format!("{}_{}", now.timestamp_millis(), kind.suffix())
            .parse::<TrackingId>()
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(kind = ?kind, error = %e, "Cull sweep skipped");
                return 0;
            }
        };

        let mut stopped = 0;
        for user in &users {
            for (servername, server) in &user.servers {
                if !expired(server, now) {
                    continue;
                }
                let label = server_label(&user.name, servername);
                tracing::info!(server = %label, kind = ?kind, "Culling server");
                match self
                    .stopper
                    .stop_server(None, &user.name, servername, tracking_id.clone())
                    .await
                {
                    Ok(()) => stopped += 1,
                    Err(e) => tracing::warn!(server = %label, error = %e, "Could not cull server"),
                }
            }
        }
        stopped
    }

    /// Run both sweeps every `cull_interval_secs` until the task is dropped.
    pub async fn run(&self) {
        let period = Duration::from_secs(self.preferences.cull_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval = ?period, "Starting cull loop");
        loop {
            interval.tick().await;
            let idle = self.cull_inactive().await;
            let long_running = self.cull_long_running().await;
            if idle + long_running > 0 {
                tracing::info!(idle, long_running, "Cull sweep queued stops");
            }
        }
    }
}
