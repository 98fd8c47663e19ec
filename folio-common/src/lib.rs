//! Shared types and utilities for the Folio sync engine.
//!
//! This crate holds everything the engine and its embedders agree on:
//! the domain types (commits, local changes, conflicts, resolutions),
//! the error taxonomy, the configuration surface, and the logging
//! bootstrap. It deliberately contains no I/O beyond config loading.

pub mod config;
pub mod errors;
pub mod logging;
pub mod types;

pub use config::{
    AutosaveConfig, QueueConfig, QuotaThresholds, RetryConfig, SyncConfig, WatcherConfig,
};
pub use errors::{ErrorKind, SyncError};
pub use types::{
    AppliedResolution, CommitRef, Conflict, ConflictKind, LocalChange, PersistState, RemoteFile,
    RepoSlug, ResolutionOutcome, ResolutionReport, ResolutionStrategy, SavePayload,
};
