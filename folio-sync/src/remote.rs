//! Remote repository abstraction.
//!
//! The thin operation set the engine needs from the hosted Git backend.
//! Everything above this trait is reusable infrastructure; everything
//! calling it goes through the admission gate and retry policy (see
//! [`crate::gateway`]). Every response carries rate-limit metadata so
//! the gate can track quota from the backend's own counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folio_common::{CommitRef, RemoteFile, RepoSlug, SyncError};
use serde::Serialize;

/// Rate-limit counters the backend reports on each response,
/// conventionally carried as response headers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Response metadata attached to every remote operation.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    /// Rate-limit counters, absent when the backend did not report them.
    pub rate: Option<RateLimit>,
    /// Backend request id for log correlation, when available.
    pub request_id: Option<String>,
}

/// A remote operation's value plus its response metadata.
#[derive(Debug)]
pub struct RemoteResponse<T> {
    pub value: T,
    pub meta: ResponseMeta,
}

impl<T> RemoteResponse<T> {
    pub fn new(value: T, meta: ResponseMeta) -> Self {
        Self { value, meta }
    }
}

pub type RemoteResult<T> = Result<RemoteResponse<T>, SyncError>;

/// A file write with an optional optimistic-lock precondition.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    pub message: String,
    pub branch: String,
    /// Current remote hash the write is conditioned on. `None` writes
    /// unconditionally (used when recreating a remotely deleted path).
    pub expected_hash: Option<String>,
}

/// Result of comparing two commits on a branch.
#[derive(Debug, Clone, Serialize)]
pub struct CommitComparison {
    /// Number of commits `head` is ahead of `base`.
    pub ahead_by: usize,
    /// The commits between `base` (exclusive) and `head` (inclusive).
    pub commits: Vec<CommitRef>,
    /// Union of paths changed across those commits.
    pub changed_paths: Vec<String>,
}

/// The operations the engine consumes from the hosted Git backend.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Latest commit on a branch. Fails with `NotFound` for an empty
    /// repository or unknown branch.
    async fn latest_commit(&self, repo: &RepoSlug, branch: &str) -> RemoteResult<CommitRef>;

    /// Commits on `branch` strictly after `after` by commit timestamp,
    /// excluding `after` itself, oldest first.
    async fn commits_since(
        &self,
        repo: &RepoSlug,
        branch: &str,
        after: &CommitRef,
    ) -> RemoteResult<Vec<CommitRef>>;

    /// Paths changed by one commit. Fails with `NotFound` for an
    /// unknown SHA.
    async fn commit_changed_paths(&self, repo: &RepoSlug, sha: &str) -> RemoteResult<Vec<String>>;

    /// Current content of a path at `reference` (branch head when
    /// `None`). Fails with `NotFound` when the path is absent.
    async fn file_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        reference: Option<&str>,
    ) -> RemoteResult<RemoteFile>;

    /// Write a file, creating a commit. Fails with `PreconditionFailed`
    /// when `expected_hash` no longer matches the remote file.
    async fn write_file(&self, repo: &RepoSlug, request: &WriteRequest) -> RemoteResult<CommitRef>;

    /// Compare two commits on a branch.
    async fn compare(&self, repo: &RepoSlug, base: &str, head: &str)
    -> RemoteResult<CommitComparison>;
}
