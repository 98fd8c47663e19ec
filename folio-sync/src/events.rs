//! Typed event broadcast for engine observers.
//!
//! The editor session subscribes once and selects on the receiver;
//! delivery is at-most-once per subscriber with bounded lag (slow
//! subscribers drop the oldest events, they never block the engine).

use chrono::{DateTime, Utc};
use folio_common::PersistState;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Floor for the broadcast buffer, to avoid frequent lag/drop behavior
/// for bursty event streams.
const MIN_BUFFER: usize = 256;

/// Everything the engine reports to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Quota dipped to the warning band (but not below the pause floor).
    QuotaWarning {
        remaining: u32,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
    /// The auto-persist state machine moved.
    StateChanged {
        from: PersistState,
        to: PersistState,
    },
    /// Conflict detection found overlapping edits.
    ConflictsDetected { paths: Vec<String> },
    /// A per-path remote probe failed during detection; the path was
    /// conservatively treated as non-conflicting.
    ProbeFailed { path: String, error: String },
    /// A save (or resolving write) landed.
    SaveCompleted {
        commit_sha: String,
        saved_at: DateTime<Utc>,
    },
    /// A save attempt failed.
    SaveFailed { error: String, will_retry: bool },
    /// The remote branch moved past the session baseline.
    RemoteAdvanced { head_sha: String, ahead_by: usize },
}

/// Broadcast channel for engine events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new event bus; the buffer is clamped to at least
    /// [`MIN_BUFFER`].
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(MIN_BUFFER));
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers. Fire-and-forget: a bus
    /// with no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        debug!(?event, "event emitted");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(MIN_BUFFER)
    }
}
