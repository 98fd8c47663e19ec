//! Bounded, time-boxed request queue.
//!
//! Calls denied by the admission gate wait here. A single drain loop per
//! queue instance asks the gate, pops the oldest entry (strict FIFO),
//! runs it, and paces the next one with a fixed spacing delay. Callers
//! never block a thread: `enqueue` hands back the operation's result
//! through a oneshot, and an entry that outlives its deadline is evicted
//! with a timeout error.

use crate::metrics;
use crate::quota::QuotaGate;
use folio_common::{QueueConfig, SyncError};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

type OpFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type QueuedOp = Box<dyn FnOnce() -> OpFuture + Send>;

/// One waiting call. Owned exclusively by the queue; dropping it drops
/// the result sender, which the waiting caller observes as eviction.
struct QueuedCall {
    id: Uuid,
    run: QueuedOp,
    enqueued_at: Instant,
    deadline: Instant,
}

struct QueueInner {
    config: QueueConfig,
    gate: Arc<QuotaGate>,
    calls: Mutex<VecDeque<QueuedCall>>,
    draining: AtomicBool,
}

/// Handle to a request queue; clones share the same queue.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig, gate: Arc<QuotaGate>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                gate,
                calls: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Number of calls currently waiting.
    pub async fn depth(&self) -> usize {
        self.inner.calls.lock().await.len()
    }

    /// Whether a drain loop is currently active.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Queue `op` and wait for its turn.
    ///
    /// Fails immediately with `QueueFull` at capacity; fails with
    /// `QueueTimeout` when the call does not complete within the
    /// configured queue timeout.
    pub async fn enqueue<T, F, Fut>(&self, label: &'static str, op: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.inner.config.timeout();
        let enqueued_at = Instant::now();
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        {
            let mut calls = self.inner.calls.lock().await;
            if calls.len() >= self.inner.config.max_depth {
                warn!(op = label, depth = calls.len(), "queue full, rejecting call");
                return Err(SyncError::QueueFull { depth: calls.len() });
            }
            let run: QueuedOp = Box::new(move || {
                Box::pin(async move {
                    let _ = tx.send(op().await);
                })
            });
            calls.push_back(QueuedCall {
                id,
                run,
                enqueued_at,
                deadline: enqueued_at + timeout,
            });
            metrics::QUEUE_DEPTH.set(calls.len() as i64);
            debug!(op = label, call_id = %id, depth = calls.len(), "call queued");
        }

        self.ensure_draining();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the drain loop evicted the expired entry.
            Ok(Err(_)) => Err(SyncError::QueueTimeout {
                waited_ms: enqueued_at.elapsed().as_millis() as u64,
            }),
            Err(_) => {
                // The caller's own deadline fired first; evict eagerly so
                // queue depth reflects the rejection immediately.
                self.purge_expired().await;
                Err(SyncError::QueueTimeout {
                    waited_ms: enqueued_at.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Drop entries past their deadline.
    async fn purge_expired(&self) {
        let mut calls = self.inner.calls.lock().await;
        let now = Instant::now();
        let before = calls.len();
        calls.retain(|call| call.deadline > now);
        if calls.len() != before {
            debug!(evicted = before - calls.len(), "evicted timed-out queue entries");
        }
        metrics::QUEUE_DEPTH.set(calls.len() as i64);
    }

    /// Start the drain loop unless one is already active.
    fn ensure_draining(&self) {
        if !self.inner.draining.swap(true, Ordering::SeqCst) {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.drain().await;
            });
        }
    }

    /// Serialized drain loop; exactly one runs per queue instance.
    async fn drain(&self) {
        loop {
            self.purge_expired().await;

            if self.inner.calls.lock().await.is_empty() {
                self.inner.draining.store(false, Ordering::SeqCst);
                // An enqueue may have landed between the emptiness check
                // and clearing the flag; reclaim the loop if so.
                if self.inner.calls.lock().await.is_empty()
                    || self.inner.draining.swap(true, Ordering::SeqCst)
                {
                    return;
                }
                continue;
            }

            let admission = self.inner.gate.try_admit().await;
            if !admission.allowed {
                // Never sleep past the ceiling in one cycle: stay
                // responsive to cancellation and early quota resets.
                let sleep = (admission.wait + Duration::from_secs(1))
                    .min(self.inner.config.max_denial_sleep());
                debug!(
                    sleep_ms = sleep.as_millis() as u64,
                    "drain denied admission, sleeping"
                );
                tokio::time::sleep(sleep).await;
                continue;
            }

            let call = self.inner.calls.lock().await.pop_front();
            let Some(call) = call else {
                continue;
            };
            metrics::QUEUE_DEPTH.set(self.depth().await as i64);

            if Instant::now() >= call.deadline {
                // Expired while waiting for admission; dropping the call
                // rejects its caller.
                continue;
            }

            debug!(
                call_id = %call.id,
                waited_ms = call.enqueued_at.elapsed().as_millis() as u64,
                "executing queued call"
            );
            (call.run)().await;

            tokio::time::sleep(self.inner.config.spacing()).await;
        }
    }
}
