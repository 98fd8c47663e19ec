//! Quota admission gate.
//!
//! Tracks the remote API's rate-limit counters and decides whether a
//! caller may proceed immediately or must wait for the reset window.
//! The gate is the single writer of quota state: admission decisions,
//! response metadata, and quota-exceeded failures all mutate the state
//! under one mutex, so read-then-decide-then-update is atomic and two
//! concurrent admission checks can never both spend the same unit.

use crate::events::{EventBus, SyncEvent};
use crate::metrics;
use crate::remote::ResponseMeta;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use folio_common::QuotaThresholds;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default assumed window when the gate has not yet seen a response.
const DEFAULT_LIMIT: u32 = 5_000;
const DEFAULT_WINDOW_SECS: i64 = 3_600;

/// Point-in-time view of the tracked quota.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub used_since_reset: u32,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub allowed: bool,
    /// How long the caller should expect to wait when denied.
    pub wait: Duration,
}

/// Admission gate over the shared API quota.
pub struct QuotaGate {
    thresholds: QuotaThresholds,
    state: Mutex<QuotaSnapshot>,
    events: EventBus,
}

impl QuotaGate {
    /// Create a gate with optimistic initial state (full default quota);
    /// the first response overwrites it with the backend's counters.
    pub fn new(thresholds: QuotaThresholds, events: EventBus) -> Self {
        Self::with_initial(thresholds, events, DEFAULT_LIMIT, DEFAULT_LIMIT)
    }

    /// Create a gate with explicit initial counters (tests, warm resume).
    pub fn with_initial(
        thresholds: QuotaThresholds,
        events: EventBus,
        limit: u32,
        remaining: u32,
    ) -> Self {
        let state = QuotaSnapshot {
            limit,
            remaining: remaining.min(limit),
            reset_at: Utc::now() + ChronoDuration::seconds(DEFAULT_WINDOW_SECS),
            used_since_reset: limit.saturating_sub(remaining),
        };
        Self {
            thresholds,
            state: Mutex::new(state),
            events,
        }
    }

    /// Decide whether a caller may make a remote call right now.
    ///
    /// Allowed iff remaining quota is above the pause floor, or the
    /// reset time has passed (quota is replenished first). Admission
    /// spends one unit of tracked quota.
    pub async fn try_admit(&self) -> Admission {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if now >= state.reset_at {
            state.remaining = state.limit;
            state.used_since_reset = 0;
        }

        if state.remaining > self.thresholds.pause_threshold {
            state.remaining -= 1;
            state.used_since_reset = state.used_since_reset.saturating_add(1);
            return Admission {
                allowed: true,
                wait: Duration::ZERO,
            };
        }

        let wait = (state.reset_at - now).to_std().unwrap_or_default();
        metrics::QUOTA_DENIALS.inc();
        debug!(
            remaining = state.remaining,
            pause_threshold = self.thresholds.pause_threshold,
            wait_ms = wait.as_millis() as u64,
            "admission denied"
        );
        Admission {
            allowed: false,
            wait,
        }
    }

    /// Overwrite tracked quota from a response's rate-limit metadata.
    ///
    /// Emits a [`SyncEvent::QuotaWarning`] when remaining falls into the
    /// warning band (at or below the warning threshold but still above
    /// the pause floor).
    pub async fn update_from_response(&self, meta: &ResponseMeta) {
        let Some(rate) = meta.rate else {
            return;
        };
        let mut state = self.state.lock().await;
        state.limit = rate.limit;
        state.remaining = rate.remaining.min(rate.limit);
        state.reset_at = rate.reset_at;
        state.used_since_reset = state.limit.saturating_sub(state.remaining);
        metrics::QUOTA_REMAINING.set(i64::from(state.remaining));

        if state.remaining <= self.thresholds.warning_threshold
            && state.remaining > self.thresholds.pause_threshold
        {
            warn!(
                remaining = state.remaining,
                limit = state.limit,
                "API quota running low"
            );
            self.events.emit(SyncEvent::QuotaWarning {
                remaining: state.remaining,
                limit: state.limit,
                reset_at: state.reset_at,
            });
        }
    }

    /// Record a quota-exceeded failure: remaining drops to zero and the
    /// reset time is adopted when the backend reported one.
    pub async fn mark_exhausted(&self, reset_at: Option<DateTime<Utc>>) {
        let mut state = self.state.lock().await;
        state.used_since_reset = state.used_since_reset.saturating_add(state.remaining);
        state.remaining = 0;
        if let Some(at) = reset_at {
            state.reset_at = at;
        }
        metrics::QUOTA_REMAINING.set(0);
        warn!(reset_at = ?state.reset_at, "quota exhausted");
    }

    /// Current tracked state.
    pub async fn snapshot(&self) -> QuotaSnapshot {
        self.state.lock().await.clone()
    }
}
