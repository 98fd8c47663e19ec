//! Background watcher for remote drift.
//!
//! Periodically compares the session baseline against the remote branch
//! head and emits a [`SyncEvent::RemoteAdvanced`] when other writers
//! have pushed. Purely advisory: conflict detection still runs before
//! every save; this only lets the editor surface "remote has moved"
//! before the user hits save.

use crate::autosave::SharedBaseline;
use crate::events::{EventBus, SyncEvent};
use crate::gateway::RemoteGateway;
use folio_common::{RepoSlug, SyncError, WatcherConfig};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Polls the remote head on a fixed interval.
pub struct RemoteWatcher {
    gateway: Arc<RemoteGateway>,
    repo: RepoSlug,
    branch: String,
    baseline: SharedBaseline,
    events: EventBus,
    config: WatcherConfig,
}

impl RemoteWatcher {
    pub fn new(
        gateway: Arc<RemoteGateway>,
        repo: RepoSlug,
        branch: impl Into<String>,
        baseline: SharedBaseline,
        events: EventBus,
        config: WatcherConfig,
    ) -> Self {
        Self {
            gateway,
            repo,
            branch: branch.into(),
            baseline,
            events,
            config,
        }
    }

    /// Start the polling loop in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.poll_interval());
            // The first tick fires immediately; skip it so a freshly
            // created session does not probe before it has a baseline.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    warn!("remote drift poll failed: {}", e);
                }
            }
        })
    }

    /// One poll cycle; public for tests and manual refresh flows.
    pub async fn poll_once(&self) -> Result<(), SyncError> {
        let Some(baseline) = self.baseline.read().await.clone() else {
            debug!("no baseline yet, skipping drift poll");
            return Ok(());
        };

        let head = self.gateway.latest_commit(&self.repo, &self.branch).await?;
        if head.sha == baseline.sha {
            return Ok(());
        }

        let comparison = self
            .gateway
            .compare(&self.repo, &baseline.sha, &head.sha)
            .await?;
        if comparison.ahead_by > 0 {
            info!(
                head = %head.sha,
                ahead_by = comparison.ahead_by,
                "remote moved past session baseline"
            );
            self.events.emit(SyncEvent::RemoteAdvanced {
                head_sha: head.sha,
                ahead_by: comparison.ahead_by,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;
    use crate::queue::RequestQueue;
    use crate::quota::QuotaGate;
    use crate::retry::RetryPolicy;
    use folio_common::{QueueConfig, QuotaThresholds, RetryConfig};
    use tokio::sync::RwLock;

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        watcher: RemoteWatcher,
        events: EventBus,
    }

    fn fixture(baseline: SharedBaseline) -> Fixture {
        let remote = Arc::new(InMemoryRemote::new("main"));
        let events = EventBus::new(16);
        let gate = Arc::new(QuotaGate::new(QuotaThresholds::default(), events.clone()));
        let queue = RequestQueue::new(
            QueueConfig {
                spacing_ms: 1,
                ..QueueConfig::default()
            },
            Arc::clone(&gate),
        );
        let gateway = Arc::new(RemoteGateway::new(
            Arc::clone(&remote) as _,
            gate,
            queue,
            RetryPolicy::new(RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                backoff_factor: 2.0,
                max_delay_ms: 5,
                jitter_fraction: 0.0,
            }),
        ));
        let watcher = RemoteWatcher::new(
            gateway,
            RepoSlug::new("acme", "portfolio"),
            "main",
            baseline,
            events.clone(),
            WatcherConfig::default(),
        );
        Fixture {
            remote,
            watcher,
            events,
        }
    }

    #[tokio::test]
    async fn no_baseline_skips_quietly() {
        let f = fixture(Arc::new(RwLock::new(None)));
        f.watcher.poll_once().await.unwrap();
    }

    #[tokio::test]
    async fn unmoved_head_emits_nothing() {
        let baseline: SharedBaseline = Arc::new(RwLock::new(None));
        let f = fixture(Arc::clone(&baseline));
        let seeded = f.remote.seed_file("a.json", "A").await;
        *baseline.write().await = Some(seeded);

        let mut rx = f.events.subscribe();
        f.watcher.poll_once().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn advanced_head_emits_remote_advanced() {
        let baseline: SharedBaseline = Arc::new(RwLock::new(None));
        let f = fixture(Arc::clone(&baseline));
        let seeded = f.remote.seed_file("a.json", "A").await;
        *baseline.write().await = Some(seeded);

        f.remote.remote_edit("a.json", "B").await;
        let head = f.remote.remote_edit("b.json", "B").await;

        let mut rx = f.events.subscribe();
        f.watcher.poll_once().await.unwrap();

        match rx.recv().await.unwrap() {
            SyncEvent::RemoteAdvanced { head_sha, ahead_by } => {
                assert_eq!(head_sha, head.sha);
                assert_eq!(ahead_by, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_errors_propagate() {
        let baseline: SharedBaseline = Arc::new(RwLock::new(None));
        let f = fixture(Arc::clone(&baseline));
        let seeded = f.remote.seed_file("a.json", "A").await;
        *baseline.write().await = Some(seeded);

        f.remote
            .fail_next(SyncError::TransientNetwork("down".into()))
            .await;
        assert!(f.watcher.poll_once().await.is_err());
    }
}
