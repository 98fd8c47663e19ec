//! Per-repository sync session.
//!
//! Explicitly constructed service instance wiring the gate, queue,
//! gateway, coordinator, resolver, scheduler, and watcher together for
//! one repository-plus-branch. Lifecycle is explicit: create on session
//! start, drop on session end. No process-global state.

use crate::autosave::{AutoSaver, SharedBaseline};
use crate::coordinator::{ConflictReport, SyncCoordinator};
use crate::events::{EventBus, SyncEvent};
use crate::gateway::RemoteGateway;
use crate::poller::RemoteWatcher;
use crate::queue::RequestQueue;
use crate::quota::{QuotaGate, QuotaSnapshot};
use crate::remote::RemoteRepository;
use crate::resolver::ConflictResolver;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use folio_common::{
    CommitRef, Conflict, LocalChange, PersistState, RepoSlug, ResolutionReport, ResolutionStrategy,
    SavePayload, SyncConfig, SyncError,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::info;

/// Operator-facing view of one session (quota, queue, persistence).
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub quota: QuotaSnapshot,
    pub queue_depth: usize,
    pub queue_draining: bool,
    pub persist_state: PersistState,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub baseline: Option<CommitRef>,
}

/// One editing session against one repository and branch.
pub struct SyncSession {
    repo: RepoSlug,
    branch: String,
    config: SyncConfig,
    gateway: Arc<RemoteGateway>,
    coordinator: SyncCoordinator,
    resolver: ConflictResolver,
    saver: AutoSaver,
    baseline: SharedBaseline,
    events: EventBus,
}

impl SyncSession {
    pub fn new(
        remote: Arc<dyn RemoteRepository>,
        repo: RepoSlug,
        branch: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        let branch = branch.into();
        let events = EventBus::default();
        let gate = Arc::new(QuotaGate::new(config.quota.clone(), events.clone()));
        let queue = RequestQueue::new(config.queue.clone(), Arc::clone(&gate));
        let retry = RetryPolicy::new(config.retry.clone());
        let gateway = Arc::new(RemoteGateway::new(remote, gate, queue, retry));
        let baseline: SharedBaseline = Arc::new(RwLock::new(None));

        let coordinator = SyncCoordinator::new(
            Arc::clone(&gateway),
            repo.clone(),
            branch.clone(),
            events.clone(),
        );
        let resolver = ConflictResolver::new(Arc::clone(&gateway), repo.clone(), branch.clone());
        let saver = AutoSaver::new(
            config.autosave.clone(),
            Arc::clone(&gateway),
            repo.clone(),
            branch.clone(),
            Arc::clone(&baseline),
            events.clone(),
        );

        Self {
            repo,
            branch,
            config,
            gateway,
            coordinator,
            resolver,
            saver,
            baseline,
            events,
        }
    }

    /// Fetch the current branch head and adopt it as the baseline.
    /// Called once at session start (after fork/bootstrap returned the
    /// repository), or to re-anchor after external resets.
    pub async fn initialize(&self) -> Result<CommitRef, SyncError> {
        let head = self.gateway.latest_commit(&self.repo, &self.branch).await?;
        *self.baseline.write().await = Some(head.clone());
        info!(repo = %self.repo, branch = %self.branch, sha = %head.sha, "session baseline established");
        Ok(head)
    }

    /// Subscribe to session events (state changes, conflicts, quota
    /// warnings, drift).
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The last remote commit this session is known to derive from.
    pub async fn baseline(&self) -> Option<CommitRef> {
        self.baseline.read().await.clone()
    }

    /// Adopt an externally observed commit as the new baseline (e.g.
    /// from a bootstrap flow that returns the fork head).
    pub async fn set_baseline(&self, commit: CommitRef) {
        *self.baseline.write().await = Some(commit);
    }

    /// Schedule a debounced save of `payload`.
    pub async fn schedule_save(&self, payload: SavePayload) {
        self.saver.schedule_save(payload).await;
    }

    /// Save immediately, bypassing the debounce window.
    pub async fn force_save(&self, payload: Option<SavePayload>) {
        self.saver.force_save(payload).await;
    }

    /// Clear any pending save timer.
    pub async fn cancel_save(&self) {
        self.saver.cancel_save().await;
    }

    /// Report connectivity changes to the scheduler.
    pub async fn set_connectivity(&self, online: bool) {
        self.saver.set_connectivity(online).await;
    }

    /// Run conflict detection against the current baseline, outside the
    /// auto-save path.
    pub async fn detect_conflicts(
        &self,
        local_changes: &[LocalChange],
    ) -> Result<ConflictReport, SyncError> {
        let baseline = self
            .baseline
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Validation("session has no baseline commit".into()))?;
        self.coordinator
            .detect_conflicts(&baseline, local_changes)
            .await
    }

    /// Resolve conflicts and advance the baseline past any resolving
    /// commits.
    pub async fn resolve_conflicts(
        &self,
        conflicts: &[Conflict],
        strategy: ResolutionStrategy,
        manual_values: &HashMap<String, String>,
    ) -> ResolutionReport {
        let report = self.resolver.resolve(conflicts, strategy, manual_values).await;
        if let Some(commit) = report.last_commit() {
            *self.baseline.write().await = Some(commit.clone());
        }
        report
    }

    /// Start the background remote-drift watcher for this session.
    pub fn start_watcher(&self) -> tokio::task::JoinHandle<()> {
        RemoteWatcher::new(
            Arc::clone(&self.gateway),
            self.repo.clone(),
            self.branch.clone(),
            Arc::clone(&self.baseline),
            self.events.clone(),
            self.config.watcher.clone(),
        )
        .start()
    }

    /// Health/monitoring data contract: quota counters, queue state,
    /// and persistence state.
    pub async fn status(&self) -> SessionStatus {
        let queue = self.gateway.queue();
        SessionStatus {
            quota: self.gateway.gate().snapshot().await,
            queue_depth: queue.depth().await,
            queue_draining: queue.is_draining(),
            persist_state: self.saver.state().await,
            last_saved_at: self.saver.last_saved_at().await,
            baseline: self.baseline().await,
        }
    }
}
