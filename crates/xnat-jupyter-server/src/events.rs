//! Server lifecycle events and the per-request tracking log.
//!
//! Every start or stop request carries a [`TrackingId`]. Each step publishes a
//! [`ServerEvent`] to an [`EventSink`]; the [`EventTracker`] folds them into
//! one [`EventTrackingLog`] per tracking id. Emitters may race (a cull and a
//! user stop on the same server), so the log is re-sorted by event time on
//! every write and read. Finished requests are evicted once they pass the
//! tracker's retention age or its capacity.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use xnat_jupyter_core::{TrackingId, UserId};

use crate::error::{Result, ServerError};

/// Which lifecycle operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Server start.
    Start,
    /// Server stop.
    Stop,
}

/// Status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// A step finished; more will follow.
    InProgress,
    /// Something odd happened but the operation continues.
    Warning,
    /// The operation succeeded.
    Completed,
    /// The operation failed.
    Failed,
}

/// One progress report for a start or stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Request this event belongs to.
    pub tracking_id: TrackingId,
    /// Requesting user, absent for culls.
    pub user_id: Option<UserId>,
    /// Data type of the target item, absent for stops.
    pub xsi_type: Option<String>,
    /// Target item, absent for stops.
    pub item_id: Option<String>,
    /// Operation.
    pub operation: Operation,
    /// Status.
    pub status: EventStatus,
    /// Percent complete; terminal events are always 100.
    pub progress: u8,
    /// Milliseconds since the Unix epoch.
    pub event_time: i64,
    /// Human readable description.
    pub message: String,
}

impl ServerEvent {
    /// Anything but a failure counts as success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status != EventStatus::Failed
    }

    /// Whether this is the last event of its request.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.progress == 100
    }

    /// Merge this event into a serialized tracking log and return the new payload.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Internal` if `current` is not a valid log.
    pub fn update_tracking_payload(&self, current: Option<&str>) -> Result<String> {
        let mut log = match current {
            Some(payload) => serde_json::from_str::<EventTrackingLog>(payload)
                .map_err(|e| ServerError::Internal(format!("corrupt tracking payload: {e}")))?,
            None => EventTrackingLog::default(),
        };
        log.push(LogEntry {
            status: self.status,
            event_time: self.event_time,
            message: Some(self.message.clone()),
        });
        log.sort();
        serde_json::to_string(&log)
            .map_err(|e| ServerError::Internal(format!("failed to encode tracking payload: {e}")))
    }
}

/// Identity shared by every event of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// Request id.
    pub tracking_id: TrackingId,
    /// Requesting user.
    pub user_id: Option<UserId>,
    /// Data type of the target item.
    pub xsi_type: Option<String>,
    /// Target item.
    pub item_id: Option<String>,
    /// Operation.
    pub operation: Operation,
}

impl EventContext {
    /// Context for a start request.
    #[must_use]
    pub fn start(
        tracking_id: TrackingId,
        user_id: UserId,
        xsi_type: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            tracking_id,
            user_id: Some(user_id),
            xsi_type: Some(xsi_type.into()),
            item_id: Some(item_id.into()),
            operation: Operation::Start,
        }
    }

    /// Context for a stop request.
    #[must_use]
    pub const fn stop(tracking_id: TrackingId, user_id: Option<UserId>) -> Self {
        Self {
            tracking_id,
            user_id,
            xsi_type: None,
            item_id: None,
            operation: Operation::Stop,
        }
    }

    fn event(&self, status: EventStatus, progress: u8, message: impl Into<String>) -> ServerEvent {
        ServerEvent {
            tracking_id: self.tracking_id.clone(),
            user_id: self.user_id,
            xsi_type: self.xsi_type.clone(),
            item_id: self.item_id.clone(),
            operation: self.operation,
            status,
            progress,
            event_time: Utc::now().timestamp_millis(),
            message: message.into(),
        }
    }

    /// An in-progress event.
    #[must_use]
    pub fn progress(&self, progress: u8, message: impl Into<String>) -> ServerEvent {
        self.event(EventStatus::InProgress, progress.min(99), message)
    }

    /// A warning that does not end the request.
    #[must_use]
    pub fn warning(&self, progress: u8, message: impl Into<String>) -> ServerEvent {
        self.event(EventStatus::Warning, progress.min(99), message)
    }

    /// The terminal success event.
    #[must_use]
    pub fn completed(&self, message: impl Into<String>) -> ServerEvent {
        self.event(EventStatus::Completed, 100, message)
    }

    /// The terminal failure event.
    #[must_use]
    pub fn failed(&self, message: impl Into<String>) -> ServerEvent {
        self.event(EventStatus::Failed, 100, message)
    }
}

/// A single line of a tracking log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Status at this point.
    pub status: EventStatus,
    /// Milliseconds since the Unix epoch.
    pub event_time: i64,
    /// Description.
    pub message: Option<String>,
}

/// Append-only status history for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrackingLog {
    /// Entries; ascending by event time after `sort`.
    #[serde(default)]
    pub entry_list: Vec<LogEntry>,
}

impl EventTrackingLog {
    /// Append an entry.
    pub fn push(&mut self, entry: LogEntry) {
        self.entry_list.push(entry);
    }

    /// Order entries by event time. Entries with equal times keep insertion order.
    pub fn sort(&mut self) {
        self.entry_list.sort_by_key(|entry| entry.event_time);
    }

    /// The most recent entry.
    #[must_use]
    pub fn latest(&self) -> Option<&LogEntry> {
        self.entry_list.iter().max_by_key(|entry| entry.event_time)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry_list.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry_list.is_empty()
    }
}

/// Receives lifecycle events. Publishing never fails from the caller's view.
pub trait EventSink: Send + Sync {
    /// Deliver an event.
    fn publish(&self, event: ServerEvent);
}

/// Everything known about one tracked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOperation {
    /// Request id.
    pub tracking_id: TrackingId,
    /// Requesting user, if any.
    pub user_id: Option<UserId>,
    /// Operation.
    pub operation: Operation,
    /// `None` while running, then whether it succeeded.
    pub succeeded: Option<bool>,
    /// Sorted history.
    pub log: EventTrackingLog,
}

#[derive(Debug, Clone)]
struct TrackingRecord {
    user_id: Option<UserId>,
    operation: Operation,
    succeeded: Option<bool>,
    updated_at: i64,
    payload: String,
}

const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);
const DEFAULT_CAPACITY: usize = 1000;

/// In-memory event sink keyed by tracking id.
///
/// Requests still running are never evicted.
#[derive(Debug)]
pub struct EventTracker {
    records: RwLock<HashMap<TrackingId, TrackingRecord>>,
    retention: Duration,
    capacity: usize,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION, DEFAULT_CAPACITY)
    }
}

impl EventTracker {
    /// Create an empty tracker with the default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty tracker that keeps finished requests for at most
    /// `retention` and at most `capacity` of them.
    #[must_use]
    pub fn with_retention(retention: Duration, capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention,
            capacity,
        }
    }

    /// Drop finished requests past the age or count bound, oldest first.
    /// `keep` is never dropped.
    fn evict(&self, records: &mut HashMap<TrackingId, TrackingRecord>, keep: &TrackingId) {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(retention);
        let before = records.len();
        records.retain(|id, r| id == keep || r.succeeded.is_none() || r.updated_at >= cutoff);

        if records.len() > self.capacity {
            let mut finished: Vec<(i64, TrackingId)> = records
                .iter()
                .filter(|(id, r)| *id != keep && r.succeeded.is_some())
                .map(|(id, r)| (r.updated_at, id.clone()))
                .collect();
            finished.sort_by_key(|(at, _)| *at);
            let excess = records.len() - self.capacity;
            for (_, id) in finished.into_iter().take(excess) {
                records.remove(&id);
            }
        }

        let evicted = before - records.len();
        if evicted > 0 {
            tracing::debug!(evicted, tracked = records.len(), "Evicted finished event logs");
        }
    }

    /// The tracked request, with its log sorted by event time.
    #[must_use]
    pub fn get(&self, tracking_id: &TrackingId) -> Option<TrackedOperation> {
        let record = self.records.read().get(tracking_id).cloned()?;
        let mut log = match serde_json::from_str::<EventTrackingLog>(&record.payload) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(tracking_id = %tracking_id, error = %e, "Unreadable tracking payload");
                return None;
            }
        };
        log.sort();
        Some(TrackedOperation {
            tracking_id: tracking_id.clone(),
            user_id: record.user_id,
            operation: record.operation,
            succeeded: record.succeeded,
            log,
        })
    }

    /// Number of tracked requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl EventSink for EventTracker {
    fn publish(&self, event: ServerEvent) {
        tracing::debug!(
            tracking_id = %event.tracking_id,
            status = ?event.status,
            progress = event.progress,
            message = %event.message,
            "Server event"
        );

        let mut records = self.records.write();
        let current = records.get(&event.tracking_id).map(|r| r.payload.as_str());
        let payload = match event.update_tracking_payload(current) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(tracking_id = %event.tracking_id, error = %e, "Dropping server event");
                return;
            }
        };

        let record = records
            .entry(event.tracking_id.clone())
            .or_insert_with(|| TrackingRecord {
                user_id: event.user_id,
                operation: event.operation,
                succeeded: None,
                updated_at: event.event_time,
                payload: String::new(),
            });
        record.payload = payload;
        record.updated_at = record.updated_at.max(event.event_time);
        if event.is_completed() {
            record.succeeded = Some(event.is_success());
            self.evict(&mut records, &event.tracking_id);
        }
    }
}

/// Sinks for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use parking_lot::Mutex;

    use super::{EventSink, EventStatus, ServerEvent};

    /// Records every event in publish order.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<ServerEvent>>,
    }

    impl RecordingSink {
        /// Create an empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every event published so far.
        #[must_use]
        pub fn events(&self) -> Vec<ServerEvent> {
            self.events.lock().clone()
        }

        /// `(status, progress, message)` of every event, for compact assertions.
        #[must_use]
        pub fn trail(&self) -> Vec<(EventStatus, u8, String)> {
            self.events
                .lock()
                .iter()
                .map(|e| (e.status, e.progress, e.message.clone()))
                .collect()
        }

        /// The last event published.
        #[must_use]
        pub fn last(&self) -> Option<ServerEvent> {
            self.events.lock().last().cloned()
        }
    }

    impl EventSink for RecordingSink {
        fn publish(&self, event: ServerEvent) {
            self.events.lock().push(event);
        }
    }
}
