#![deny(unsafe_code)]

//! Shared test utilities for the msgpass workspace.
//!
//! Config builders, a tracing hook for the test harness, and a fixture that
//! runs a real dispatcher over Unix sockets in a throwaway runtime directory.
//!
//! ```toml
//! [dev-dependencies]
//! msgpass-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod dispatcher;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use dispatcher::TestDispatcher;
pub use tracing_setup::init_test_tracing;
