//! Configuration builders for tests.

use std::path::Path;

use msgpass_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .runtime_dir(tmp.path())
///     .service_name("echo")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn runtime_dir(mut self, dir: &Path) -> Self {
        self.config.transport.runtime_dir = dir.to_path_buf();
        self
    }

    pub fn service_name(mut self, name: &str) -> Self {
        self.config.service.name = name.to_string();
        self
    }

    pub fn exchange_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connector.exchange_timeout_secs = secs;
        self
    }

    pub fn prompt(mut self, prompt: &str) -> Self {
        self.config.connector.prompt = prompt.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
