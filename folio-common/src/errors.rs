//! Error taxonomy for the sync engine.
//!
//! Every failure that can cross a component boundary is a [`SyncError`].
//! The retry and queue layers branch on [`SyncError::is_retryable`] and
//! [`SyncError::kind`] rather than on string matching, so classification
//! lives here, next to the variants.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Machine-readable classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    TransientNetwork,
    TransientServer,
    NotFound,
    PreconditionFailed,
    Validation,
    QueueFull,
    QueueTimeout,
    Offline,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::TransientNetwork => write!(f, "transient_network"),
            Self::TransientServer => write!(f, "transient_server"),
            Self::NotFound => write!(f, "not_found"),
            Self::PreconditionFailed => write!(f, "precondition_failed"),
            Self::Validation => write!(f, "validation"),
            Self::QueueFull => write!(f, "queue_full"),
            Self::QueueTimeout => write!(f, "queue_timeout"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Failures surfaced by the sync engine.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The remote API request quota is exhausted. Retryable by waiting
    /// out the reset window when it is known.
    #[error("API request quota exhausted")]
    QuotaExceeded {
        /// When the quota replenishes, if the remote told us.
        reset_at: Option<DateTime<Utc>>,
    },

    /// A network-level failure that is expected to clear on its own.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// A server-side failure (5xx class) that is expected to clear.
    #[error("transient server failure (status {status}): {message}")]
    TransientServer { status: u16, message: String },

    /// A file, ref, or commit the caller asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic-lock write precondition did not hold.
    #[error("write precondition failed for {path}")]
    PreconditionFailed {
        path: String,
        /// Hash the caller expected the remote file to have.
        expected: Option<String>,
    },

    /// The caller's input was malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request queue is at capacity; the call was never queued.
    #[error("request queue full (depth {depth})")]
    QueueFull { depth: usize },

    /// The call waited in the queue past its deadline and was evicted.
    #[error("request timed out after {waited_ms} ms in queue")]
    QueueTimeout { waited_ms: u64 },

    /// Connectivity is lost; persistence is suspended rather than failed.
    #[error("offline")]
    Offline,
}

impl SyncError {
    /// Classification used by retry/queue layers and event payloads.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::TransientServer { .. } => ErrorKind::TransientServer,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::Validation(_) => ErrorKind::Validation,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::QueueTimeout { .. } => ErrorKind::QueueTimeout,
            Self::Offline => ErrorKind::Offline,
        }
    }

    /// Whether the retry policy may attempt this call again.
    ///
    /// Quota exhaustion and transient network/server failures recover on
    /// their own; everything else is permanent for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::TransientNetwork(_) | Self::TransientServer { .. }
        )
    }
}
