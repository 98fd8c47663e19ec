//! Logging bootstrap shared by embedders and tests.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber.
///
/// The filter comes from `FOLIO_SYNC_LOG` when set, otherwise from the
/// provided default directive (e.g. `"info"` or `"folio_sync=debug"`).
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_env("FOLIO_SYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Initialize logging for tests, routing output through the test writer
/// so `cargo test` captures it per-test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("FOLIO_SYNC_LOG")
            .unwrap_or_else(|_| EnvFilter::new("debug"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .compact()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
