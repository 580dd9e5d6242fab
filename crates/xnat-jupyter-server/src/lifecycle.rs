//! Server lifecycle state machine.
//!
//! This module tracks which servers have a start or stop in flight so a second
//! request for the same server is refused instead of racing the first.
//!
//! # State Machine
//!
//! ```text
//!          ┌────────┐  start   ┌──────────┐  ready   ┌─────────┐
//!          │  Idle  │─────────▶│ Starting │─────────▶│ Running │
//!          └────────┘          └────┬─────┘          └────┬────┘
//!               ▲                   │ (timeout/error)     │ stop
//!               │                   ▼                     ▼
//!               │              ┌──────────┐         ┌──────────┐
//!               │              │  Failed  │◀────────│ Stopping │
//!               │              └──────────┘         └────┬─────┘
//!               │                                        │ (absent)
//!               └────────────────────────────────────────┘
//! ```
//!
//! Local state is advisory. The Hub decides whether a server exists, so a new
//! request from any settled state (`Idle`, `Running`, `Failed`) is admitted and
//! checked against the Hub; only `Starting` and `Stopping` block.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::hub::server_label;

/// Where a server is in its lifecycle, as far as this process knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// No server, or none we know of.
    #[default]
    Idle,
    /// A start request is being driven.
    Starting,
    /// The Hub reported the server ready.
    Running,
    /// A stop request is being driven.
    Stopping,
    /// The last start or stop did not finish.
    Failed,
}

impl ServerState {
    /// Whether a request is being driven for the server.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ServerState, to: ServerState) -> bool {
    use ServerState::{Failed, Idle, Running, Starting, Stopping};

    matches!(
        (from, to),
        (Idle | Running | Failed, Starting)
            | (Idle | Running | Failed, Stopping)
            | (Starting, Running | Failed)
            | (Stopping, Idle | Failed)
    )
}

/// Identifies one server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerKey {
    /// Hub username.
    pub username: String,
    /// Server name, empty for the default server.
    pub servername: String,
}

impl ServerKey {
    /// Create a key.
    #[must_use]
    pub fn new(username: impl Into<String>, servername: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            servername: servername.into(),
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&server_label(&self.username, &self.servername))
    }
}

/// Per-server lifecycle state.
///
/// Idle servers have no entry. The table holds at most one entry per
/// `(user, server name)` pair ever seen, so it grows with the user base and
/// not with request volume.
#[derive(Debug, Default)]
pub struct ServerStateTable {
    states: RwLock<HashMap<ServerKey, ServerState>>,
}

impl ServerStateTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a server.
    #[must_use]
    pub fn state(&self, key: &ServerKey) -> ServerState {
        self.states.read().get(key).copied().unwrap_or_default()
    }

    /// Number of servers with a non-idle state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Whether every server is idle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Claim a server for a start or stop.
    ///
    /// The returned guard must be finished with [`InFlight::finish`]; dropping
    /// it unfinished records `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::OperationInProgress` if another request holds the
    /// server, and `ServerError::Internal` if `to` is not `Starting` or `Stopping`.
    pub fn begin(self: &Arc<Self>, key: ServerKey, to: ServerState) -> Result<InFlight> {
        if !to.is_in_flight() {
            return Err(ServerError::Internal(format!(
                "cannot begin a request in state {to:?}"
            )));
        }

        let mut states = self.states.write();
        let from = states.get(&key).copied().unwrap_or_default();
        if from.is_in_flight() {
            tracing::warn!(server = %key, state = ?from, "Refusing overlapping request");
            return Err(ServerError::OperationInProgress(format!(
                "{key} is {}",
                if from == ServerState::Starting { "starting" } else { "stopping" }
            )));
        }
        validate_transition(&key, from, to)?;
        states.insert(key.clone(), to);
        drop(states);

        tracing::debug!(server = %key, from = ?from, to = ?to, "Server state changed");
        Ok(InFlight {
            table: Arc::clone(self),
            key,
            state: to,
            finished: false,
        })
    }

    fn settle(&self, key: &ServerKey, from: ServerState, to: ServerState) -> Result<()> {
        validate_transition(key, from, to)?;
        let mut states = self.states.write();
        if to == ServerState::Idle {
            states.remove(key);
        } else {
            states.insert(key.clone(), to);
        }
        drop(states);
        tracing::debug!(server = %key, from = ?from, to = ?to, "Server state changed");
        Ok(())
    }
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `ServerError::Internal` if the transition is not allowed.
pub fn validate_transition(
    key: &ServerKey,
    from: ServerState,
    to: ServerState,
) -> Result<ServerState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(ServerError::Internal(format!(
            "invalid state transition for {key}: {from:?} -> {to:?}"
        )))
    }
}

/// A claimed server. Finishing or dropping it releases the claim.
#[derive(Debug)]
pub struct InFlight {
    table: Arc<ServerStateTable>,
    key: ServerKey,
    state: ServerState,
    finished: bool,
}

impl InFlight {
    /// The claimed server.
    #[must_use]
    pub const fn key(&self) -> &ServerKey {
        &self.key
    }

    /// Record the outcome and release the claim.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Internal` if `to` is not a valid outcome; the
    /// server is then recorded as `Failed`.
    pub fn finish(mut self, to: ServerState) -> Result<()> {
        self.finished = true;
        if let Err(e) = self.table.settle(&self.key, self.state, to) {
            self.table
                .settle(&self.key, self.state, ServerState::Failed)?;
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.table.settle(&self.key, self.state, ServerState::Failed) {
                tracing::error!(server = %self.key, error = %e, "Failed to release server claim");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ServerKey {
        ServerKey::new("andy", "")
    }

    #[test]
    fn valid_transitions() {
        use ServerState::*;

        assert!(is_valid_transition(Idle, Starting));
        assert!(is_valid_transition(Starting, Running));
        assert!(is_valid_transition(Starting, Failed));
        assert!(is_valid_transition(Running, Stopping));
        assert!(is_valid_transition(Stopping, Idle));
        assert!(is_valid_transition(Stopping, Failed));
        assert!(is_valid_transition(Failed, Starting));
    }

    #[test]
    fn invalid_transitions() {
        use ServerState::*;

        assert!(!is_valid_transition(Idle, Running));
        assert!(!is_valid_transition(Starting, Stopping));
        assert!(!is_valid_transition(Stopping, Running));
        assert!(!is_valid_transition(Starting, Idle));
        assert!(!is_valid_transition(Running, Idle));
    }

    #[test]
    fn second_request_is_refused_while_in_flight() {
        let table = Arc::new(ServerStateTable::new());
        let claim = table.begin(key(), ServerState::Starting).unwrap();
        assert_eq!(table.state(&key()), ServerState::Starting);

        assert!(matches!(
            table.begin(key(), ServerState::Stopping),
            Err(ServerError::OperationInProgress(_))
        ));
        assert!(table
            .begin(ServerKey::new("andy", "lab"), ServerState::Starting)
            .is_ok());

        claim.finish(ServerState::Running).unwrap();
        assert_eq!(table.state(&key()), ServerState::Running);
    }

    #[test]
    fn stop_to_idle_forgets_the_server() {
        let table = Arc::new(ServerStateTable::new());
        table
            .begin(key(), ServerState::Stopping)
            .unwrap()
            .finish(ServerState::Idle)
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.state(&key()), ServerState::Idle);
    }

    #[test]
    fn dropped_claim_records_failure() {
        let table = Arc::new(ServerStateTable::new());
        drop(table.begin(key(), ServerState::Starting).unwrap());
        assert_eq!(table.state(&key()), ServerState::Failed);
        assert!(table.begin(key(), ServerState::Starting).is_ok());
    }

    #[test]
    fn invalid_outcome_is_rejected() {
        let table = Arc::new(ServerStateTable::new());
        let claim = table.begin(key(), ServerState::Starting).unwrap();
        assert!(matches!(
            claim.finish(ServerState::Idle),
            Err(ServerError::Internal(_))
        ));
        assert_eq!(table.state(&key()), ServerState::Failed);
        assert!(matches!(
            table.begin(key(), ServerState::Running),
            Err(ServerError::Internal(_))
        ));
    }
}
