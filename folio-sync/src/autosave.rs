//! Debounced auto-persist scheduler.
//!
//! Owns the "is there unsaved work" state machine. Rapid edits coalesce
//! behind one cancellable debounce timer; a save first runs conflict
//! detection against the session baseline, then writes each changed path
//! with its baseline hash as the optimistic-lock precondition. Failures
//! retry with a linearly growing delay up to the configured limit;
//! connectivity loss suspends the machine instead of failing it.
//!
//! The timer is an explicit task owned by the scheduler: `cancel` and
//! re-`schedule` semantics do not depend on any UI lifecycle.

use crate::coordinator::SyncCoordinator;
use crate::events::{EventBus, SyncEvent};
use crate::gateway::RemoteGateway;
use crate::metrics;
use crate::remote::WriteRequest;
use chrono::{DateTime, Utc};
use folio_common::{AutosaveConfig, CommitRef, PersistState, RepoSlug, SavePayload, SyncError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Baseline commit shared between the scheduler, the session, and the
/// drift watcher.
pub type SharedBaseline = Arc<RwLock<Option<CommitRef>>>;

struct SaverState {
    persist: PersistState,
    /// Most recent scheduled payload, retained until saved.
    pending: Option<SavePayload>,
    /// Last payload that was successfully persisted.
    last_saved: Option<SavePayload>,
    /// Armed debounce or retry timer.
    timer: Option<JoinHandle<()>>,
    retry_count: u32,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    online: bool,
}

struct SaverInner {
    config: AutosaveConfig,
    gateway: Arc<RemoteGateway>,
    coordinator: SyncCoordinator,
    repo: RepoSlug,
    branch: String,
    baseline: SharedBaseline,
    events: EventBus,
    state: Mutex<SaverState>,
}

/// Debounced auto-persist scheduler; one instance per
/// repository-plus-branch editing session.
#[derive(Clone)]
pub struct AutoSaver {
    inner: Arc<SaverInner>,
}

impl AutoSaver {
    pub fn new(
        config: AutosaveConfig,
        gateway: Arc<RemoteGateway>,
        repo: RepoSlug,
        branch: impl Into<String>,
        baseline: SharedBaseline,
        events: EventBus,
    ) -> Self {
        let branch = branch.into();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&gateway),
            repo.clone(),
            branch.clone(),
            events.clone(),
        );
        Self {
            inner: Arc::new(SaverInner {
                config,
                gateway,
                coordinator,
                repo,
                branch,
                baseline,
                events,
                state: Mutex::new(SaverState {
                    persist: PersistState::Idle,
                    pending: None,
                    last_saved: None,
                    timer: None,
                    retry_count: 0,
                    last_saved_at: None,
                    last_error: None,
                    online: true,
                }),
            }),
        }
    }

    /// Current state of the save machine.
    pub async fn state(&self) -> PersistState {
        self.inner.state.lock().await.persist
    }

    /// When the last successful save landed.
    pub async fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.last_saved_at
    }

    /// Last save error, kept until the next success.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.lock().await.last_error.clone()
    }

    /// Schedule a save after the debounce window.
    ///
    /// A payload deeply equal to the last successfully saved one is a
    /// no-op. Scheduling again before the timer fires restarts the
    /// window (debounce, not throttle).
    pub async fn schedule_save(&self, payload: SavePayload) {
        let mut st = self.inner.state.lock().await;
        if st.last_saved.as_ref() == Some(&payload) {
            debug!("payload identical to last saved data, skipping");
            return;
        }
        st.pending = Some(payload);
        if !st.online {
            // No timers while offline; the reconnect path resumes this.
            debug!("offline, save deferred until reconnect");
            return;
        }
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        SaverInner::transition(&self.inner, &mut st, PersistState::Pending);
        let inner = Arc::clone(&self.inner);
        let debounce = self.inner.config.debounce();
        st.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            SaverInner::fire(inner).await;
        }));
    }

    /// Save immediately, bypassing the debounce window. Uses `payload`
    /// when given, otherwise whatever is pending. Completes when the
    /// save attempt has finished.
    pub async fn force_save(&self, payload: Option<SavePayload>) {
        {
            let mut st = self.inner.state.lock().await;
            if let Some(payload) = payload {
                st.pending = Some(payload);
            }
            if st.pending.is_none() {
                debug!("force_save with nothing pending, ignoring");
                return;
            }
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
        }
        SaverInner::fire(Arc::clone(&self.inner)).await;
    }

    /// Clear the pending timer and return to idle. Pending data is kept;
    /// no save is attempted.
    pub async fn cancel_save(&self) {
        let mut st = self.inner.state.lock().await;
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        SaverInner::transition(&self.inner, &mut st, PersistState::Idle);
    }

    /// Report connectivity changes. Going offline cancels any pending
    /// timer (no silent retries); coming back online resumes a save of
    /// the most recent data immediately when something is outstanding.
    pub async fn set_connectivity(&self, online: bool) {
        let resume = {
            let mut st = self.inner.state.lock().await;
            if st.online == online {
                return;
            }
            st.online = online;
            if !online {
                if let Some(timer) = st.timer.take() {
                    timer.abort();
                }
                SaverInner::transition(&self.inner, &mut st, PersistState::Offline);
                false
            } else {
                let outstanding = st.pending.is_some() && st.pending != st.last_saved;
                if outstanding {
                    SaverInner::transition(&self.inner, &mut st, PersistState::Pending);
                } else {
                    SaverInner::transition(&self.inner, &mut st, PersistState::Idle);
                }
                outstanding
            }
        };
        if resume {
            info!("back online, resuming save of most recent data");
            SaverInner::fire(Arc::clone(&self.inner)).await;
        }
    }
}

impl SaverInner {
    fn transition(inner: &SaverInner, st: &mut SaverState, to: PersistState) {
        if st.persist == to {
            return;
        }
        debug!(from = %st.persist, to = %to, "persist state transition");
        inner.events.emit(SyncEvent::StateChanged {
            from: st.persist,
            to,
        });
        st.persist = to;
    }

    /// Run one save attempt: claim the pending payload, check for
    /// conflicts, write, and settle the outcome.
    fn fire(inner: Arc<SaverInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
        let payload = {
            let mut st = inner.state.lock().await;
            if !st.online {
                Self::transition(&inner, &mut st, PersistState::Offline);
                return;
            }
            if st.persist == PersistState::Saving {
                // A save is already in flight; it settles the machine.
                return;
            }
            let Some(payload) = st.pending.clone() else {
                Self::transition(&inner, &mut st, PersistState::Idle);
                return;
            };
            st.timer = None;
            Self::transition(&inner, &mut st, PersistState::Saving);
            payload
        };

        if inner.config.conflict_detection {
            let baseline = inner.baseline.read().await.clone();
            if let Some(baseline) = baseline {
                match inner
                    .coordinator
                    .detect_conflicts(&baseline, &payload.changes)
                    .await
                {
                    Ok(report) if report.has_conflicts => {
                        warn!(
                            conflicts = report.conflicts.len(),
                            "conflicts detected, save blocked until resolved"
                        );
                        metrics::SAVES.with_label_values(&["conflict"]).inc();
                        let mut st = inner.state.lock().await;
                        Self::transition(&inner, &mut st, PersistState::Conflict);
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        Self::handle_failure(&inner, err).await;
                        return;
                    }
                }
            }
        }

        let mut last_commit = None;
        for change in &payload.changes {
            let request = WriteRequest {
                path: change.path.clone(),
                content: change.content.clone(),
                message: payload.message.clone(),
                branch: inner.branch.clone(),
                expected_hash: change.baseline_hash.clone(),
            };
            match inner.gateway.write_file(&inner.repo, request).await {
                Ok(commit) => last_commit = Some(commit),
                Err(err @ SyncError::PreconditionFailed { .. }) => {
                    // The upfront check is not atomic with the write;
                    // the per-path precondition is the real safety net.
                    warn!(path = %change.path, "write precondition failed, surfacing as conflict");
                    metrics::SAVES.with_label_values(&["conflict"]).inc();
                    let mut st = inner.state.lock().await;
                    st.last_error = Some(err.to_string());
                    Self::transition(&inner, &mut st, PersistState::Conflict);
                    return;
                }
                Err(err) => {
                    Self::handle_failure(&inner, err).await;
                    return;
                }
            }
        }

        if let Some(commit) = &last_commit {
            *inner.baseline.write().await = Some(commit.clone());
        }

        let saved_at = Utc::now();
        let mut st = inner.state.lock().await;
        if st.pending.as_ref() == Some(&payload) {
            st.pending = None;
        }
        st.last_saved = Some(payload);
        st.last_saved_at = Some(saved_at);
        st.retry_count = 0;
        st.last_error = None;
        metrics::SAVES.with_label_values(&["saved"]).inc();
        if st.pending.is_some() {
            // A newer payload arrived mid-save and its timer may have
            // fired into the in-flight guard; re-arm the window so it is
            // not stranded.
            Self::transition(&inner, &mut st, PersistState::Pending);
            let inner2 = Arc::clone(&inner);
            let debounce = inner.config.debounce();
            st.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                SaverInner::fire(inner2).await;
            }));
        } else {
            Self::transition(&inner, &mut st, PersistState::Idle);
        }
        drop(st);

        if let Some(commit) = last_commit {
            info!(sha = %commit.sha, "save completed");
            inner.events.emit(SyncEvent::SaveCompleted {
                commit_sha: commit.sha,
                saved_at,
            });
        }
        })
    }

    /// Retry with a linearly growing delay, or give up into the error
    /// state once retries are exhausted.
    async fn handle_failure(inner: &Arc<SaverInner>, err: SyncError) {
        let mut st = inner.state.lock().await;
        st.last_error = Some(err.to_string());

        if st.retry_count < inner.config.max_retries {
            st.retry_count += 1;
            let delay = inner.config.retry_delay() * st.retry_count;
            warn!(
                error = %err,
                retry = st.retry_count,
                delay_ms = delay.as_millis() as u64,
                "save failed, retrying"
            );
            metrics::SAVES.with_label_values(&["retried"]).inc();
            inner.events.emit(SyncEvent::SaveFailed {
                error: err.to_string(),
                will_retry: true,
            });
            Self::transition(inner, &mut st, PersistState::Retrying);
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
            let inner2 = Arc::clone(inner);
            st.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                SaverInner::fire(inner2).await;
            }));
        } else {
            warn!(error = %err, "save retries exhausted");
            // Reset so a later manual retry starts its backoff fresh.
            st.retry_count = 0;
            metrics::SAVES.with_label_values(&["failed"]).inc();
            inner.events.emit(SyncEvent::SaveFailed {
                error: err.to_string(),
                will_retry: false,
            });
            Self::transition(inner, &mut st, PersistState::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRemote;
    use crate::queue::RequestQueue;
    use crate::quota::QuotaGate;
    use crate::retry::RetryPolicy;
    use folio_common::{LocalChange, QueueConfig, QuotaThresholds, RetryConfig};
    use std::time::Duration;

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        saver: AutoSaver,
        baseline: SharedBaseline,
        events: EventBus,
    }

    async fn fixture(config: AutosaveConfig) -> Fixture {
        let remote = Arc::new(InMemoryRemote::new("main"));
        let baseline_commit = remote.seed_file("a.json", "A").await;

        let events = EventBus::new(64);
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
        let baseline: SharedBaseline = Arc::new(RwLock::new(Some(baseline_commit)));
        let saver = AutoSaver::new(
            config,
            gateway,
            RepoSlug::new("acme", "portfolio"),
            "main",
            Arc::clone(&baseline),
            events.clone(),
        );
        Fixture {
            remote,
            saver,
            baseline,
            events,
        }
    }

    fn fast_config() -> AutosaveConfig {
        AutosaveConfig {
            debounce_ms: 40,
            max_retries: 3,
            retry_delay_ms: 10,
            conflict_detection: true,
        }
    }

    fn payload(content: &str) -> SavePayload {
        SavePayload::new(
            vec![
                LocalChange::new("a.json", content)
                    .with_baseline_hash(InMemoryRemote::content_hash("A")),
            ],
            "autosave",
        )
    }

    #[tokio::test]
    async fn five_rapid_schedules_produce_one_save_with_last_payload() {
        let f = fixture(fast_config()).await;

        for i in 1..=5 {
            f.saver.schedule_save(payload(&format!("v{i}"))).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.remote.write_count().await, 1);
        assert_eq!(
            f.remote.file_hash("a.json").await.unwrap(),
            InMemoryRemote::content_hash("v5")
        );
        assert_eq!(f.saver.state().await, PersistState::Idle);
        assert!(f.saver.last_saved_at().await.is_some());
    }

    #[tokio::test]
    async fn successful_save_advances_the_baseline() {
        let f = fixture(fast_config()).await;
        let before = f.baseline.read().await.clone().unwrap();

        f.saver.force_save(Some(payload("X"))).await;

        let after = f.baseline.read().await.clone().unwrap();
        assert_ne!(before.sha, after.sha);
        assert_eq!(after.sha, f.remote.head().await.unwrap().sha);
    }

    #[tokio::test]
    async fn identical_payload_is_a_noop() {
        let f = fixture(fast_config()).await;
        f.saver.force_save(Some(payload("X"))).await;
        assert_eq!(f.remote.write_count().await, 1);

        f.saver.schedule_save(payload("X")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(f.remote.write_count().await, 1, "no redundant save");
        assert_eq!(f.saver.state().await, PersistState::Idle);
    }

    #[tokio::test]
    async fn cancel_clears_timer_without_saving() {
        let f = fixture(fast_config()).await;
        f.saver.schedule_save(payload("X")).await;
        assert_eq!(f.saver.state().await, PersistState::Pending);

        f.saver.cancel_save().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(f.remote.write_count().await, 0);
        assert_eq!(f.saver.state().await, PersistState::Idle);
    }

    #[tokio::test]
    async fn conflicts_block_the_save() {
        let f = fixture(fast_config()).await;
        // Another writer changes the same path after our baseline.
        f.remote.remote_edit("a.json", "THEIRS").await;

        f.saver.force_save(Some(payload("OURS"))).await;

        assert_eq!(f.saver.state().await, PersistState::Conflict);
        assert_eq!(f.remote.write_count().await, 0, "save function not called");
    }

    #[tokio::test]
    async fn precondition_failure_surfaces_as_conflict() {
        let mut config = fast_config();
        config.conflict_detection = false;
        let f = fixture(config).await;
        // Remote moved; with detection disabled the write precondition
        // is the only guard.
        f.remote.remote_edit("a.json", "THEIRS").await;

        f.saver.force_save(Some(payload("OURS"))).await;

        assert_eq!(f.saver.state().await, PersistState::Conflict);
        assert!(
            f.saver
                .last_error()
                .await
                .unwrap()
                .contains("precondition")
        );
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let f = fixture(fast_config()).await;
        f.remote
            .fail_next_op(
                "write_file",
                SyncError::TransientServer {
                    status: 502,
                    message: "bad gateway".into(),
                },
            )
            .await;

        f.saver.force_save(Some(payload("X"))).await;
        // First attempt failed; a retry timer is armed.
        assert_eq!(f.saver.state().await, PersistState::Retrying);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.saver.state().await, PersistState::Idle);
        assert_eq!(f.remote.write_count().await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_enter_error_state() {
        let f = fixture(fast_config()).await;
        // Initial attempt + 3 retries, all failing.
        for _ in 0..4 {
            f.remote
                .fail_next_op(
                    "write_file",
                    SyncError::TransientServer {
                        status: 500,
                        message: "boom".into(),
                    },
                )
                .await;
        }

        let mut rx = f.events.subscribe();
        f.saver.force_save(Some(payload("X"))).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.saver.state().await, PersistState::Error);
        assert_eq!(f.remote.write_count().await, 0);

        let mut final_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::SaveFailed { will_retry, .. } = event {
                final_failure = !will_retry;
            }
        }
        assert!(final_failure, "last SaveFailed event must not promise a retry");

        // A later manual retry starts fresh and succeeds.
        f.saver.force_save(None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.saver.state().await, PersistState::Idle);
        assert_eq!(f.remote.write_count().await, 1);
    }

    #[tokio::test]
    async fn offline_defers_and_reconnect_resumes() {
        let f = fixture(fast_config()).await;
        f.saver.set_connectivity(false).await;
        assert_eq!(f.saver.state().await, PersistState::Offline);

        f.saver.schedule_save(payload("X")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.remote.write_count().await, 0, "no saves while offline");
        assert_eq!(f.saver.state().await, PersistState::Offline);

        f.saver.set_connectivity(true).await;
        assert_eq!(f.remote.write_count().await, 1);
        assert_eq!(f.saver.state().await, PersistState::Idle);
    }

    #[tokio::test]
    async fn going_offline_cancels_pending_timer() {
        let f = fixture(fast_config()).await;
        f.saver.schedule_save(payload("X")).await;
        f.saver.set_connectivity(false).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.remote.write_count().await, 0);
        assert_eq!(f.saver.state().await, PersistState::Offline);
    }

    #[tokio::test]
    async fn state_change_events_are_emitted() {
        let f = fixture(fast_config()).await;
        let mut rx = f.events.subscribe();

        f.saver.force_save(Some(payload("X"))).await;

        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                SyncEvent::StateChanged { to, .. } => transitions.push(to),
                SyncEvent::SaveCompleted { .. } => transitions.push(PersistState::Idle),
                _ => {}
            }
        }
        assert!(transitions.contains(&PersistState::Saving));
        assert!(transitions.contains(&PersistState::Idle));
    }
}
