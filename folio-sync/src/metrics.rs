//! Prometheus metrics for the sync engine.
//!
//! Registered into a crate-local registry rather than the default one so
//! embedders composing several sessions (or other prometheus users) keep
//! control over what they export.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();

    /// Remote calls by operation and admission path (direct/queued).
    pub static ref REMOTE_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("folio_remote_requests_total", "Remote API calls issued"),
        &["op", "path"],
    )
    .unwrap();

    /// Retry attempts across all operations.
    pub static ref REMOTE_RETRIES: IntCounter = IntCounter::new(
        "folio_remote_retries_total",
        "Remote call retry attempts",
    )
    .unwrap();

    /// Admissions denied by the quota gate.
    pub static ref QUOTA_DENIALS: IntCounter = IntCounter::new(
        "folio_quota_denials_total",
        "Admissions denied because quota was at or below the pause floor",
    )
    .unwrap();

    /// Conflicts surfaced by the coordinator.
    pub static ref CONFLICTS_DETECTED: IntCounter = IntCounter::new(
        "folio_conflicts_detected_total",
        "File conflicts surfaced by detection",
    )
    .unwrap();

    /// Saves by outcome (saved/conflict/retried/failed).
    pub static ref SAVES: IntCounterVec = IntCounterVec::new(
        Opts::new("folio_saves_total", "Auto-persist save attempts"),
        &["outcome"],
    )
    .unwrap();

    /// Current request queue depth.
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "folio_queue_depth",
        "Calls currently waiting in the request queue",
    )
    .unwrap();

    /// Last observed remaining quota.
    pub static ref QUOTA_REMAINING: IntGauge = IntGauge::new(
        "folio_quota_remaining",
        "Remaining API quota as of the last response",
    )
    .unwrap();
}

/// Register all engine metrics. Safe to call more than once; duplicate
/// registrations are ignored.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REMOTE_REQUESTS.clone()),
        Box::new(REMOTE_RETRIES.clone()),
        Box::new(QUOTA_DENIALS.clone()),
        Box::new(CONFLICTS_DETECTED.clone()),
        Box::new(SAVES.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(QUOTA_REMAINING.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

/// Encode the engine registry in the Prometheus text format.
pub fn encode_metrics() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics output was not UTF-8: {e}")))
}
