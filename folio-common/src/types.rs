//! Common types used across Folio components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a remote repository by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A commit as observed on the remote. Immutable once observed; the
/// last-known `CommitRef` is the baseline for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Commit SHA.
    pub sha: String,
    /// Commit message.
    pub message: String,
    /// Author identity as reported by the remote.
    pub author: String,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Branch this commit was observed on.
    pub branch: String,
}

/// One path a local session believes it has modified since baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalChange {
    /// Repository-relative path.
    pub path: String,
    /// Full local content for the path.
    pub content: String,
    /// Hash of the file at baseline, `None` when the path was not
    /// previously tracked locally.
    pub baseline_hash: Option<String>,
}

impl LocalChange {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            baseline_hash: None,
        }
    }

    #[must_use]
    pub fn with_baseline_hash(mut self, hash: impl Into<String>) -> Self {
        self.baseline_hash = Some(hash.into());
        self
    }
}

/// A file snapshot fetched from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    /// Content hash the remote uses for write preconditions.
    pub hash: String,
}

/// Classification of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the file to different content.
    ContentConflict,
    /// The remote deleted a path the local session still edits.
    RemoteDeleteLocalEdit,
    /// The remote created a path that collides with an untracked local edit.
    RemoteNewLocalEdit,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentConflict => write!(f, "content_conflict"),
            Self::RemoteDeleteLocalEdit => write!(f, "remote_delete_local_edit"),
            Self::RemoteNewLocalEdit => write!(f, "remote_new_local_edit"),
        }
    }
}

/// A file-level conflict between a local edit and the current remote state.
///
/// Created by the synchronization coordinator, consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
    /// The local side of the conflict.
    pub local: LocalChange,
    /// Current remote snapshot; `None` when the remote deleted the path.
    pub remote: Option<RemoteFile>,
    /// Human-readable summary for surfacing to the editor.
    pub description: String,
}

/// Strategy requested by the caller for a batch of conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepLocal,
    KeepRemote,
    /// Use a caller-supplied value per path.
    Manual,
}

/// What actually happened to one conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedResolution {
    KeptLocal,
    KeptRemote,
    Manual,
}

impl std::fmt::Display for AppliedResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeptLocal => write!(f, "kept_local"),
            Self::KeptRemote => write!(f, "kept_remote"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Outcome of one resolution attempt for one conflicting path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub path: String,
    /// The resolution that was applied, absent when the attempt failed
    /// before any strategy could run.
    pub applied: Option<AppliedResolution>,
    pub success: bool,
    /// Commit produced by a resolving write, when one happened.
    pub resulting_commit: Option<CommitRef>,
    pub error: Option<String>,
}

/// Per-path outcomes plus the aggregate summary for one resolution batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub outcomes: Vec<ResolutionOutcome>,
    pub resolved: usize,
    pub failed: usize,
    pub total: usize,
}

impl ResolutionReport {
    /// Build a report from per-path outcomes, deriving the summary counts.
    pub fn from_outcomes(outcomes: Vec<ResolutionOutcome>) -> Self {
        let total = outcomes.len();
        let resolved = outcomes.iter().filter(|o| o.success).count();
        Self {
            outcomes,
            resolved,
            failed: total - resolved,
            total,
        }
    }

    /// The last commit produced by a successful resolving write, if any.
    pub fn last_commit(&self) -> Option<&CommitRef> {
        self.outcomes
            .iter()
            .rev()
            .find_map(|o| o.resulting_commit.as_ref())
    }
}

/// State of the auto-persist scheduler's save machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistState {
    /// Nothing outstanding.
    Idle,
    /// A debounce timer is armed.
    Pending,
    /// A save is in flight.
    Saving,
    /// A save failed and a retry is scheduled.
    Retrying,
    /// Conflicts block the save; the caller must resolve first.
    Conflict,
    /// Retries exhausted or a permanent failure occurred.
    Error,
    /// Connectivity lost; persistence is suspended, not failed.
    Offline,
}

impl std::fmt::Display for PersistState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Saving => write!(f, "saving"),
            Self::Retrying => write!(f, "retrying"),
            Self::Conflict => write!(f, "conflict"),
            Self::Error => write!(f, "error"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// The unit of work the auto-persist scheduler saves: a set of local
/// changes plus the commit message to persist them under.
///
/// Deep equality against the last successfully saved payload is what
/// makes redundant saves no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePayload {
    pub changes: Vec<LocalChange>,
    pub message: String,
}

impl SavePayload {
    pub fn new(changes: Vec<LocalChange>, message: impl Into<String>) -> Self {
        Self {
            changes,
            message: message.into(),
        }
    }
}
