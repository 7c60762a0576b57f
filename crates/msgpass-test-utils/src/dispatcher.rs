//! A dispatcher running over Unix sockets in a temporary runtime directory.

use std::path::Path;

use msgpass_config::AppConfig;
use msgpass_core::dispatcher::Interrupt;
use msgpass_core::{Address, ConnectMode, Connector, Dispatcher, ServeOutcome, UnixTransport};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;

/// A serving dispatcher plus everything needed to reach it.
///
/// The runtime directory is deleted when this value is dropped, even on
/// panic.
pub struct TestDispatcher {
    pub config: AppConfig,
    pub transport: UnixTransport,
    pub address: Address,
    interrupt: broadcast::Sender<Interrupt>,
    handle: Option<JoinHandle<ServeOutcome>>,
    _runtime_dir: TempDir,
}

impl TestDispatcher {
    /// Start a dispatcher registered under `name` and serve in the background.
    pub async fn spawn(name: &str) -> Self {
        let runtime_dir = TempDir::new().expect("failed to create runtime dir");
        let config = TestConfigBuilder::new()
            .runtime_dir(runtime_dir.path())
            .service_name(name)
            .build();
        let transport = UnixTransport::from_config(&config.transport);

        let mut dispatcher = Dispatcher::startup(transport.clone(), name)
            .await
            .expect("dispatcher startup failed");
        let address = dispatcher.address();
        let interrupt = dispatcher.interrupt_handle();
        let handle = tokio::spawn(async move { dispatcher.run().await });

        Self {
            config,
            transport,
            address,
            interrupt,
            handle: Some(handle),
            _runtime_dir: runtime_dir,
        }
    }

    pub fn runtime_dir(&self) -> &Path {
        self.transport.runtime_dir()
    }

    pub fn name(&self) -> &str {
        &self.config.service.name
    }

    /// Connect a new client by service name.
    pub async fn connect_by_name(&self) -> Connector<UnixTransport> {
        Connector::connect(
            self.transport.clone(),
            ConnectMode::ByName(self.name().to_string()),
        )
        .await
        .expect("connect by name failed")
    }

    /// Connect a new client by channel address.
    pub async fn connect_by_address(&self) -> Connector<UnixTransport> {
        Connector::connect(self.transport.clone(), ConnectMode::ByAddress(self.address))
            .await
            .expect("connect by address failed")
    }

    /// Ask the serving loop to stop.
    pub fn interrupt(&self) {
        let _ = self.interrupt.send(Interrupt);
    }

    /// Wait for the serving loop to finish and return why it stopped.
    pub async fn join(&mut self) -> ServeOutcome {
        self.handle
            .take()
            .expect("dispatcher already joined")
            .await
            .expect("dispatcher task panicked")
    }
}

impl Drop for TestDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
