//! Conflict detection against a baseline commit.
//!
//! Given the last commit a session is known to derive from and the set
//! of locally modified paths, decides whether the remote has moved,
//! which paths it touched, and which of those overlap local edits.
//! Comparison is whole-file: identical content on both sides is a
//! convergent edit, not a conflict.

use crate::events::{EventBus, SyncEvent};
use crate::gateway::RemoteGateway;
use crate::metrics;
use folio_common::{CommitRef, Conflict, ConflictKind, LocalChange, RepoSlug, SyncError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// A per-path remote probe that failed during detection. The path was
/// treated as non-conflicting; callers deciding whether to trust a
/// "no conflicts" answer should look here first.
#[derive(Debug, Clone)]
pub struct ProbeFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of one detection run.
#[derive(Debug)]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub conflicts: Vec<Conflict>,
    /// Remote commits found after the baseline, oldest first.
    pub remote_commits: Vec<CommitRef>,
    pub probe_failures: Vec<ProbeFailure>,
}

impl ConflictReport {
    fn clean(remote_commits: Vec<CommitRef>) -> Self {
        Self {
            has_conflicts: false,
            conflicts: Vec::new(),
            remote_commits,
            probe_failures: Vec::new(),
        }
    }
}

/// Detects file-level conflicts between local edits and remote history.
pub struct SyncCoordinator {
    gateway: Arc<RemoteGateway>,
    repo: RepoSlug,
    branch: String,
    events: EventBus,
}

impl SyncCoordinator {
    pub fn new(
        gateway: Arc<RemoteGateway>,
        repo: RepoSlug,
        branch: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            repo,
            branch: branch.into(),
            events,
        }
    }

    /// Compare local changes against everything the remote gained after
    /// `baseline`.
    pub async fn detect_conflicts(
        &self,
        baseline: &CommitRef,
        local_changes: &[LocalChange],
    ) -> Result<ConflictReport, SyncError> {
        let remote_commits = self
            .gateway
            .commits_since(&self.repo, &self.branch, baseline)
            .await?;
        if remote_commits.is_empty() {
            debug!(baseline = %baseline.sha, "remote has not moved, no conflicts possible");
            return Ok(ConflictReport::clean(remote_commits));
        }

        let mut remote_changed: HashSet<String> = HashSet::new();
        for commit in &remote_commits {
            let paths = self
                .gateway
                .commit_changed_paths(&self.repo, &commit.sha)
                .await?;
            remote_changed.extend(paths);
        }
        debug!(
            commits = remote_commits.len(),
            paths = remote_changed.len(),
            "remote moved since baseline"
        );

        let mut conflicts = Vec::new();
        let mut probe_failures = Vec::new();
        for change in local_changes {
            if !remote_changed.contains(&change.path) {
                continue;
            }
            match self
                .gateway
                .file_content(&self.repo, &change.path, None)
                .await
            {
                Ok(remote_file) => {
                    if remote_file.content == change.content {
                        // Convergent edit: both sides arrived at the
                        // same content.
                        debug!(path = %change.path, "convergent edit, not a conflict");
                        continue;
                    }
                    let kind = if change.baseline_hash.is_none() {
                        ConflictKind::RemoteNewLocalEdit
                    } else {
                        ConflictKind::ContentConflict
                    };
                    conflicts.push(Conflict {
                        path: change.path.clone(),
                        kind,
                        description: describe(kind, &change.path),
                        local: change.clone(),
                        remote: Some(remote_file),
                    });
                }
                Err(SyncError::NotFound(_)) => {
                    conflicts.push(Conflict {
                        path: change.path.clone(),
                        kind: ConflictKind::RemoteDeleteLocalEdit,
                        description: describe(ConflictKind::RemoteDeleteLocalEdit, &change.path),
                        local: change.clone(),
                        remote: None,
                    });
                }
                Err(err) => {
                    // Preserved source behavior: a failed probe counts as
                    // "no conflict" for this path only. Risky enough that
                    // it is reported, never swallowed.
                    warn!(
                        path = %change.path,
                        error = %err,
                        "conflict probe failed; treating path as non-conflicting"
                    );
                    self.events.emit(SyncEvent::ProbeFailed {
                        path: change.path.clone(),
                        error: err.to_string(),
                    });
                    probe_failures.push(ProbeFailure {
                        path: change.path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        if !conflicts.is_empty() {
            metrics::CONFLICTS_DETECTED.inc_by(conflicts.len() as u64);
            self.events.emit(SyncEvent::ConflictsDetected {
                paths: conflicts.iter().map(|c| c.path.clone()).collect(),
            });
        }

        Ok(ConflictReport {
            has_conflicts: !conflicts.is_empty(),
            conflicts,
            remote_commits,
            probe_failures,
        })
    }
}

fn describe(kind: ConflictKind, path: &str) -> String {
    match kind {
        ConflictKind::ContentConflict => {
            format!("{path} was changed both locally and on the remote")
        }
        ConflictKind::RemoteDeleteLocalEdit => {
            format!("{path} was deleted on the remote while edited locally")
        }
        ConflictKind::RemoteNewLocalEdit => {
            format!("{path} was created on the remote and collides with a new local file")
        }
    }
}
