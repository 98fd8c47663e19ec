//! Configuration surface for the sync engine.
//!
//! Values only, not a CLI: embedders construct a [`SyncConfig`] directly,
//! deserialize one from TOML, or start from defaults and apply the
//! `FOLIO_SYNC_*` environment overrides. Durations are stored as integer
//! milliseconds in the serialized form and exposed as [`Duration`]
//! accessors to the engine.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Quota thresholds for the admission gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaThresholds {
    /// Remaining-requests level at which a warning is emitted.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
    /// Remaining-requests floor below which admission is denied.
    #[serde(default = "default_pause_threshold")]
    pub pause_threshold: u32,
}

impl Default for QuotaThresholds {
    fn default() -> Self {
        Self {
            warning_threshold: 100,
            pause_threshold: 50,
        }
    }
}

/// Request queue sizing and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of waiting calls before new ones are rejected.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// How long a queued call may wait before being evicted.
    #[serde(default = "default_queue_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed spacing between executed calls, to avoid bursting the
    /// remote right after an admission.
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,
    /// Ceiling on a single denial sleep, so the drain loop stays
    /// responsive to cancellation and early quota resets.
    #[serde(default = "default_max_denial_sleep_ms")]
    pub max_denial_sleep_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            timeout_ms: 300_000,
            spacing_ms: 100,
            max_denial_sleep_ms: 60_000,
        }
    }
}

impl QueueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }

    pub fn max_denial_sleep(&self) -> Duration {
        Duration::from_millis(self.max_denial_sleep_ms)
    }
}

/// Bounded, jittered exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Uniform random jitter as a fraction of the computed delay.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter_fraction: 0.3,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Auto-persist scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Quiet period after the last `schedule_save` before a save fires.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Save retries before giving up and entering the error state.
    #[serde(default = "default_max_save_retries")]
    pub max_retries: u32,
    /// Base delay between save retries; the n-th retry waits n times this.
    #[serde(default = "default_save_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Whether to run conflict detection before each save.
    #[serde(default = "default_true")]
    pub conflict_detection: bool,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            conflict_detection: true,
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Remote-drift watcher knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 60_000,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub quota: QuotaThresholds,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl SyncConfig {
    /// Load configuration from a TOML file. Missing sections fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply `FOLIO_SYNC_*` environment overrides to the common knobs.
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn apply_env_overrides(&mut self) {
        override_from_env("FOLIO_SYNC_QUEUE_MAX_DEPTH", &mut self.queue.max_depth);
        override_from_env("FOLIO_SYNC_QUEUE_TIMEOUT_MS", &mut self.queue.timeout_ms);
        override_from_env(
            "FOLIO_SYNC_AUTOSAVE_DEBOUNCE_MS",
            &mut self.autosave.debounce_ms,
        );
        override_from_env("FOLIO_SYNC_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_from_env(
            "FOLIO_SYNC_WATCHER_POLL_INTERVAL_MS",
            &mut self.watcher.poll_interval_ms,
        );
    }
}

fn override_from_env<T: std::str::FromStr>(var: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(var, value = %raw, "ignoring unparseable environment override"),
    }
}

fn default_warning_threshold() -> u32 {
    100
}

fn default_pause_threshold() -> u32 {
    50
}

fn default_max_depth() -> usize {
    100
}

fn default_queue_timeout_ms() -> u64 {
    300_000
}

fn default_spacing_ms() -> u64 {
    100
}

fn default_max_denial_sleep_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_fraction() -> f64 {
    0.3
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_max_save_retries() -> u32 {
    3
}

fn default_save_retry_delay_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}
