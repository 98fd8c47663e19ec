//! Repository synchronization engine.
//!
//! Lets an editing session persist structured content into a remote
//! version-controlled repository reachable only through a quota-limited
//! API, reconciling divergent states with optimistic concurrency:
//!
//! - [`quota`]: admission gate over the shared API quota
//! - [`queue`]: bounded FIFO waiting area for denied calls
//! - [`retry`]: bounded, jittered exponential backoff
//! - [`remote`] / [`memory`]: the backend operation set and its
//!   in-memory test double
//! - [`gateway`]: the three layers composed around every remote call
//! - [`coordinator`]: file-level conflict detection against a baseline
//! - [`resolver`]: keep-local / keep-remote / manual resolution
//! - [`autosave`]: debounced auto-persist state machine
//! - [`poller`]: background remote-drift watcher
//! - [`session`]: explicitly constructed per-repository façade
//! - [`events`], [`metrics`], [`http_api`]: observer surfaces

pub mod autosave;
pub mod coordinator;
pub mod events;
pub mod gateway;
pub mod http_api;
pub mod memory;
pub mod metrics;
pub mod poller;
pub mod queue;
pub mod quota;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod session;

pub use autosave::{AutoSaver, SharedBaseline};
pub use coordinator::{ConflictReport, ProbeFailure, SyncCoordinator};
pub use events::{EventBus, SyncEvent};
pub use gateway::RemoteGateway;
pub use memory::InMemoryRemote;
pub use poller::RemoteWatcher;
pub use queue::RequestQueue;
pub use quota::{Admission, QuotaGate, QuotaSnapshot};
pub use remote::{
    CommitComparison, RateLimit, RemoteRepository, RemoteResponse, ResponseMeta, WriteRequest,
};
pub use resolver::ConflictResolver;
pub use retry::RetryPolicy;
pub use session::{SessionStatus, SyncSession};
