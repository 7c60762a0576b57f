//! Tracing initialisation for tests.
//!
//! The subscriber is installed at most once per process, so every test may
//! call [`init_test_tracing`].

use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test-harness writer, filtered by
/// `RUST_LOG` (default `msgpass_core=debug`).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("msgpass_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
