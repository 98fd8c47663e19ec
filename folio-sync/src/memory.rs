//! In-memory remote repository for tests and offline development.
//!
//! Behaves like the hosted backend from the engine's point of view:
//! content-hashed files, a linear commit history per branch, rate-limit
//! counters on every response, optimistic-lock write preconditions, and
//! scriptable failures. It opens no sockets; it is intended for CI and
//! integration tests where the real API is unavailable.

use crate::remote::{
    CommitComparison, RateLimit, RemoteRepository, RemoteResponse, RemoteResult, ResponseMeta,
    WriteRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use folio_common::{CommitRef, RemoteFile, RepoSlug, SyncError};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_LIMIT: u32 = 5_000;

/// Author recorded for commits created through [`RemoteRepository::write_file`].
const ENGINE_AUTHOR: &str = "folio-sync";

struct StoredCommit {
    commit: CommitRef,
    changed_paths: Vec<String>,
}

struct RemoteState {
    files: HashMap<String, RemoteFile>,
    commits: Vec<StoredCommit>,
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
    write_count: u32,
    scripted_failures: VecDeque<SyncError>,
    op_failures: HashMap<String, VecDeque<SyncError>>,
    sha_counter: u64,
}

/// Seedable, scriptable in-memory backend.
pub struct InMemoryRemote {
    branch: String,
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            state: Mutex::new(RemoteState {
                files: HashMap::new(),
                commits: Vec::new(),
                limit: DEFAULT_LIMIT,
                remaining: DEFAULT_LIMIT,
                reset_at: Utc::now() + ChronoDuration::hours(1),
                write_count: 0,
                scripted_failures: VecDeque::new(),
                op_failures: HashMap::new(),
                sha_counter: 0,
            }),
        }
    }

    /// Content hash the backend uses for write preconditions.
    pub fn content_hash(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex()[..40].to_string()
    }

    /// Seed a file without consuming quota, committing as `remote`.
    pub async fn seed_file(&self, path: &str, content: &str) -> CommitRef {
        let mut state = self.state.lock().await;
        Self::apply_change(&mut state, &self.branch, "remote", &format!("seed {path}"), path, Some(content))
    }

    /// Simulate another writer changing a file.
    pub async fn remote_edit(&self, path: &str, content: &str) -> CommitRef {
        let mut state = self.state.lock().await;
        Self::apply_change(
            &mut state,
            &self.branch,
            "other-session",
            &format!("update {path}"),
            path,
            Some(content),
        )
    }

    /// Simulate another writer deleting a file.
    pub async fn remote_delete(&self, path: &str) -> CommitRef {
        let mut state = self.state.lock().await;
        Self::apply_change(
            &mut state,
            &self.branch,
            "other-session",
            &format!("delete {path}"),
            path,
            None,
        )
    }

    /// Script the next call to fail with `err` (consumed once, before
    /// quota accounting).
    pub async fn fail_next(&self, err: SyncError) {
        self.state.lock().await.scripted_failures.push_back(err);
    }

    /// Script the next call to a specific operation to fail with `err`.
    pub async fn fail_next_op(&self, op: &str, err: SyncError) {
        self.state
            .lock()
            .await
            .op_failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Override the rate-limit counters reported on subsequent calls.
    pub async fn set_quota(&self, limit: u32, remaining: u32, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.limit = limit;
        state.remaining = remaining.min(limit);
        state.reset_at = reset_at;
    }

    /// Number of commits created through `write_file`.
    pub async fn write_count(&self) -> u32 {
        self.state.lock().await.write_count
    }

    /// Current branch head, if any commit exists.
    pub async fn head(&self) -> Option<CommitRef> {
        self.state
            .lock()
            .await
            .commits
            .last()
            .map(|c| c.commit.clone())
    }

    /// Current hash of a remote file.
    pub async fn file_hash(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .files
            .get(path)
            .map(|f| f.hash.clone())
    }

    fn apply_change(
        state: &mut RemoteState,
        branch: &str,
        author: &str,
        message: &str,
        path: &str,
        content: Option<&str>,
    ) -> CommitRef {
        match content {
            Some(content) => {
                state.files.insert(
                    path.to_string(),
                    RemoteFile {
                        path: path.to_string(),
                        content: content.to_string(),
                        hash: Self::content_hash(content),
                    },
                );
            }
            None => {
                state.files.remove(path);
            }
        }
        Self::record_commit(state, branch, author, message, vec![path.to_string()])
    }

    fn record_commit(
        state: &mut RemoteState,
        branch: &str,
        author: &str,
        message: &str,
        changed_paths: Vec<String>,
    ) -> CommitRef {
        state.sha_counter += 1;
        let sha = blake3::hash(&state.sha_counter.to_le_bytes()).to_hex()[..40].to_string();
        let commit = CommitRef {
            sha,
            message: message.to_string(),
            author: author.to_string(),
            timestamp: Self::next_timestamp(state),
            branch: branch.to_string(),
        };
        state.commits.push(StoredCommit {
            commit: commit.clone(),
            changed_paths,
        });
        commit
    }

    /// Commit timestamps must be strictly increasing for timestamp-based
    /// "commits since" filtering to hold under rapid test commits.
    fn next_timestamp(state: &RemoteState) -> DateTime<Utc> {
        let now = Utc::now();
        match state.commits.last() {
            Some(last) if last.commit.timestamp >= now => {
                last.commit.timestamp + ChronoDuration::milliseconds(1)
            }
            _ => now,
        }
    }

    /// Scripted failure, quota window roll-over, and per-call quota spend.
    fn begin_call(state: &mut RemoteState, op: &str) -> Result<(), SyncError> {
        if let Some(err) = state
            .op_failures
            .get_mut(op)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        if let Some(err) = state.scripted_failures.pop_front() {
            return Err(err);
        }
        if Utc::now() >= state.reset_at {
            state.remaining = state.limit;
            state.reset_at = Utc::now() + ChronoDuration::hours(1);
        }
        if state.remaining == 0 {
            return Err(SyncError::QuotaExceeded {
                reset_at: Some(state.reset_at),
            });
        }
        state.remaining -= 1;
        Ok(())
    }

    fn meta(state: &RemoteState) -> ResponseMeta {
        ResponseMeta {
            rate: Some(RateLimit {
                limit: state.limit,
                remaining: state.remaining,
                reset_at: state.reset_at,
            }),
            request_id: Some(Uuid::new_v4().simple().to_string()),
        }
    }

    fn check_branch(&self, branch: &str) -> Result<(), SyncError> {
        if branch == self.branch {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("branch {branch}")))
        }
    }
}

#[async_trait]
impl RemoteRepository for InMemoryRemote {
    async fn latest_commit(&self, _repo: &RepoSlug, branch: &str) -> RemoteResult<CommitRef> {
        self.check_branch(branch)?;
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "latest_commit")?;
        let head = state
            .commits
            .last()
            .map(|c| c.commit.clone())
            .ok_or_else(|| SyncError::NotFound("repository has no commits".into()))?;
        Ok(RemoteResponse::new(head, Self::meta(&state)))
    }

    async fn commits_since(
        &self,
        _repo: &RepoSlug,
        branch: &str,
        after: &CommitRef,
    ) -> RemoteResult<Vec<CommitRef>> {
        self.check_branch(branch)?;
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "commits_since")?;
        let commits = state
            .commits
            .iter()
            .filter(|c| c.commit.timestamp > after.timestamp && c.commit.sha != after.sha)
            .map(|c| c.commit.clone())
            .collect();
        Ok(RemoteResponse::new(commits, Self::meta(&state)))
    }

    async fn commit_changed_paths(&self, _repo: &RepoSlug, sha: &str) -> RemoteResult<Vec<String>> {
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "commit_changed_paths")?;
        let paths = state
            .commits
            .iter()
            .find(|c| c.commit.sha == sha)
            .map(|c| c.changed_paths.clone())
            .ok_or_else(|| SyncError::NotFound(format!("commit {sha}")))?;
        Ok(RemoteResponse::new(paths, Self::meta(&state)))
    }

    async fn file_content(
        &self,
        _repo: &RepoSlug,
        path: &str,
        _reference: Option<&str>,
    ) -> RemoteResult<RemoteFile> {
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "file_content")?;
        let file = state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        Ok(RemoteResponse::new(file, Self::meta(&state)))
    }

    async fn write_file(&self, _repo: &RepoSlug, request: &WriteRequest) -> RemoteResult<CommitRef> {
        self.check_branch(&request.branch)?;
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "write_file")?;

        if let Some(expected) = &request.expected_hash {
            let current = state.files.get(&request.path).map(|f| f.hash.as_str());
            if current != Some(expected.as_str()) {
                return Err(SyncError::PreconditionFailed {
                    path: request.path.clone(),
                    expected: Some(expected.clone()),
                });
            }
        }

        state.files.insert(
            request.path.clone(),
            RemoteFile {
                path: request.path.clone(),
                content: request.content.clone(),
                hash: Self::content_hash(&request.content),
            },
        );
        let commit = Self::record_commit(
            &mut state,
            &request.branch,
            ENGINE_AUTHOR,
            &request.message,
            vec![request.path.clone()],
        );
        state.write_count += 1;
        Ok(RemoteResponse::new(commit, Self::meta(&state)))
    }

    async fn compare(
        &self,
        _repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> RemoteResult<CommitComparison> {
        let mut state = self.state.lock().await;
        Self::begin_call(&mut state, "compare")?;

        let position = |sha: &str| state.commits.iter().position(|c| c.commit.sha == sha);
        let base_idx = position(base).ok_or_else(|| SyncError::NotFound(format!("commit {base}")))?;
        let head_idx = position(head).ok_or_else(|| SyncError::NotFound(format!("commit {head}")))?;

        let range = if head_idx > base_idx {
            &state.commits[base_idx + 1..=head_idx]
        } else {
            &[]
        };
        let mut changed_paths: Vec<String> = Vec::new();
        for stored in range {
            for path in &stored.changed_paths {
                if !changed_paths.contains(path) {
                    changed_paths.push(path.clone());
                }
            }
        }
        let comparison = CommitComparison {
            ahead_by: range.len(),
            commits: range.iter().map(|c| c.commit.clone()).collect(),
            changed_paths,
        };
        Ok(RemoteResponse::new(comparison, Self::meta(&state)))
    }
}
