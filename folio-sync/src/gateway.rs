//! Gated access to the remote repository.
//!
//! Composes the three layers around every remote call (admission,
//! queueing, retry) without hidden re-entry: an attempt first asks the
//! gate; when denied it waits in the queue instead of spinning, and a
//! retry re-enters admission (and therefore the queue while quota is
//! out) rather than calling the backend directly. The gateway is also
//! the single place response metadata flows back into the gate.

use crate::metrics;
use crate::queue::RequestQueue;
use crate::quota::QuotaGate;
use crate::remote::{CommitComparison, RemoteRepository, RemoteResult, WriteRequest};
use crate::retry::RetryPolicy;
use folio_common::{CommitRef, RemoteFile, RepoSlug, SyncError};
use std::sync::Arc;
use tracing::debug;

/// Admission-gated, queued, retried view of a [`RemoteRepository`].
pub struct RemoteGateway {
    remote: Arc<dyn RemoteRepository>,
    gate: Arc<QuotaGate>,
    queue: RequestQueue,
    retry: RetryPolicy,
}

impl RemoteGateway {
    pub fn new(
        remote: Arc<dyn RemoteRepository>,
        gate: Arc<QuotaGate>,
        queue: RequestQueue,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            gate,
            queue,
            retry,
        }
    }

    pub fn gate(&self) -> Arc<QuotaGate> {
        Arc::clone(&self.gate)
    }

    pub fn queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    /// Latest commit on a branch.
    pub async fn latest_commit(
        &self,
        repo: &RepoSlug,
        branch: &str,
    ) -> Result<CommitRef, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        let branch = branch.to_string();
        self.execute("latest_commit", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let branch = branch.clone();
            async move { remote.latest_commit(&repo, &branch).await }
        })
        .await
    }

    /// Commits strictly after `after` on a branch, oldest first.
    pub async fn commits_since(
        &self,
        repo: &RepoSlug,
        branch: &str,
        after: &CommitRef,
    ) -> Result<Vec<CommitRef>, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        let branch = branch.to_string();
        let after = after.clone();
        self.execute("commits_since", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let branch = branch.clone();
            let after = after.clone();
            async move { remote.commits_since(&repo, &branch, &after).await }
        })
        .await
    }

    /// Paths changed by one commit.
    pub async fn commit_changed_paths(
        &self,
        repo: &RepoSlug,
        sha: &str,
    ) -> Result<Vec<String>, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        let sha = sha.to_string();
        self.execute("commit_changed_paths", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let sha = sha.clone();
            async move { remote.commit_changed_paths(&repo, &sha).await }
        })
        .await
    }

    /// Current content of a path.
    pub async fn file_content(
        &self,
        repo: &RepoSlug,
        path: &str,
        reference: Option<&str>,
    ) -> Result<RemoteFile, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        let path = path.to_string();
        let reference = reference.map(str::to_string);
        self.execute("file_content", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let path = path.clone();
            let reference = reference.clone();
            async move { remote.file_content(&repo, &path, reference.as_deref()).await }
        })
        .await
    }

    /// Write a file, creating a commit.
    pub async fn write_file(
        &self,
        repo: &RepoSlug,
        request: WriteRequest,
    ) -> Result<CommitRef, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        self.execute("write_file", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let request = request.clone();
            async move { remote.write_file(&repo, &request).await }
        })
        .await
    }

    /// Compare two commits on a branch.
    pub async fn compare(
        &self,
        repo: &RepoSlug,
        base: &str,
        head: &str,
    ) -> Result<CommitComparison, SyncError> {
        let remote = Arc::clone(&self.remote);
        let repo = repo.clone();
        let base = base.to_string();
        let head = head.to_string();
        self.execute("compare", move || {
            let remote = Arc::clone(&remote);
            let repo = repo.clone();
            let base = base.clone();
            let head = head.clone();
            async move { remote.compare(&repo, &base, &head).await }
        })
        .await
    }

    /// Run one logical remote call through retry → admission → queue.
    async fn execute<T, F, Fut>(&self, label: &'static str, op: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        self.retry
            .execute(label, |_attempt| self.attempt(label, Arc::clone(&op)))
            .await
    }

    /// One attempt: ask admission, run directly or via the queue, then
    /// feed response metadata back into the gate.
    async fn attempt<T, F, Fut>(&self, label: &'static str, op: Arc<F>) -> Result<T, SyncError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let admission = self.gate.try_admit().await;
        let outcome = if admission.allowed {
            metrics::REMOTE_REQUESTS
                .with_label_values(&[label, "direct"])
                .inc();
            op().await
        } else {
            debug!(
                op = label,
                wait_ms = admission.wait.as_millis() as u64,
                "admission denied, entering queue"
            );
            metrics::REMOTE_REQUESTS
                .with_label_values(&[label, "queued"])
                .inc();
            self.queue
                .enqueue(label, move || async move { op().await })
                .await
        };

        match outcome {
            Ok(response) => {
                self.gate.update_from_response(&response.meta).await;
                Ok(response.value)
            }
            Err(err) => {
                if let SyncError::QuotaExceeded { reset_at } = &err {
                    self.gate.mark_exhausted(*reset_at).await;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::memory::InMemoryRemote;
    use chrono::{Duration as ChronoDuration, Utc};
    use folio_common::{QueueConfig, QuotaThresholds, RetryConfig};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            backoff_factor: 2.0,
            max_delay_ms: 5,
            jitter_fraction: 0.0,
        })
    }

    fn test_queue_config() -> QueueConfig {
        QueueConfig {
            max_depth: 100,
            timeout_ms: 5_000,
            spacing_ms: 1,
            max_denial_sleep_ms: 20,
        }
    }

    fn build(remote: Arc<InMemoryRemote>) -> RemoteGateway {
        let gate = Arc::new(QuotaGate::new(
            QuotaThresholds::default(),
            EventBus::default(),
        ));
        let queue = RequestQueue::new(test_queue_config(), Arc::clone(&gate));
        RemoteGateway::new(remote, gate, queue, fast_retry())
    }

    fn repo() -> RepoSlug {
        RepoSlug::new("acme", "portfolio")
    }

    #[tokio::test]
    async fn direct_call_updates_gate_from_response() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;
        let reset = Utc::now() + ChronoDuration::minutes(30);
        remote.set_quota(1_000, 900, reset).await;

        let gateway = build(Arc::clone(&remote));
        gateway.latest_commit(&repo(), "main").await.unwrap();

        let snap = gateway.gate().snapshot().await;
        assert_eq!(snap.limit, 1_000);
        // The backend reported 899 remaining after spending one unit.
        assert_eq!(snap.remaining, 899);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;
        remote
            .fail_next(SyncError::TransientNetwork("reset".into()))
            .await;

        let gateway = build(Arc::clone(&remote));
        let head = gateway.latest_commit(&repo(), "main").await.unwrap();
        assert_eq!(head.branch, "main");
    }

    #[tokio::test]
    async fn permanent_failure_propagates_immediately() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;

        let gateway = build(Arc::clone(&remote));
        let err = gateway
            .file_content(&repo(), "missing.json", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn denied_admission_routes_through_queue() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;

        // Gate at the pause floor: the first attempt must queue. A
        // second task raises the gate shortly after, letting the drain
        // loop admit the queued call.
        let gate = Arc::new(QuotaGate::with_initial(
            QuotaThresholds::default(),
            EventBus::default(),
            5_000,
            50,
        ));
        let queue = RequestQueue::new(test_queue_config(), Arc::clone(&gate));
        let gateway = RemoteGateway::new(Arc::clone(&remote) as _, Arc::clone(&gate), queue, fast_retry());

        let raiser = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                gate.update_from_response(&crate::remote::ResponseMeta {
                    rate: Some(crate::remote::RateLimit {
                        limit: 5_000,
                        remaining: 4_000,
                        reset_at: Utc::now() + ChronoDuration::minutes(30),
                    }),
                    request_id: None,
                })
                .await;
            })
        };

        let head = gateway.latest_commit(&repo(), "main").await.unwrap();
        assert_eq!(head.branch, "main");
        raiser.await.unwrap();
    }

    #[tokio::test]
    async fn quota_exceeded_from_backend_marks_gate_exhausted() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;
        let reset = Utc::now() + ChronoDuration::minutes(10);
        remote
            .fail_next(SyncError::QuotaExceeded {
                reset_at: Some(reset),
            })
            .await;

        // One attempt only, so the scripted quota failure surfaces.
        let gate = Arc::new(QuotaGate::new(
            QuotaThresholds::default(),
            EventBus::default(),
        ));
        let queue = RequestQueue::new(test_queue_config(), Arc::clone(&gate));
        let gateway = RemoteGateway::new(
            Arc::clone(&remote) as _,
            Arc::clone(&gate),
            queue,
            RetryPolicy::new(RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                backoff_factor: 2.0,
                max_delay_ms: 5,
                jitter_fraction: 0.0,
            }),
        );

        let err = gateway.latest_commit(&repo(), "main").await.unwrap_err();
        assert!(matches!(err, SyncError::QuotaExceeded { .. }));

        let snap = gate.snapshot().await;
        assert_eq!(snap.remaining, 0);
        assert_eq!(snap.reset_at, reset);
    }

    #[tokio::test]
    async fn write_roundtrip_through_gateway() {
        let remote = Arc::new(InMemoryRemote::new("main"));
        remote.seed_file("a.json", "A").await;
        let hash = remote.file_hash("a.json").await.unwrap();

        let gateway = build(Arc::clone(&remote));
        let commit = gateway
            .write_file(
                &repo(),
                WriteRequest {
                    path: "a.json".into(),
                    content: "A2".into(),
                    message: "update a".into(),
                    branch: "main".into(),
                    expected_hash: Some(hash),
                },
            )
            .await
            .unwrap();

        assert_eq!(commit.message, "update a");
        let file = gateway.file_content(&repo(), "a.json", None).await.unwrap();
        assert_eq!(file.content, "A2");
    }
}
