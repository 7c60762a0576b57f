#![deny(unsafe_code)]

//! Startup plumbing shared by `msgpass-server` and `msgpass-client`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use msgpass_config::AppConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Flags accepted by both binaries.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = "msgpass.toml")]
    pub config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Filter directive for the given verbosity, falling back to the configured
/// level when no `-v` was passed.
pub fn filter_directive(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => &config.logging.level,
        1 => "debug",
        _ => "trace",
    }
}

/// Install the fmt subscriber on stderr. `RUST_LOG` wins over everything.
pub fn init_tracing(verbose: u8, config: &AppConfig) {
    let fallback = filter_directive(verbose, config);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Read the config at `path`, or defaults when it does not exist.
///
/// Returns whether the file was found so the caller can log it once tracing
/// is up.
pub async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("cannot access {}", path.display()))?;
    if !exists {
        return Ok((AppConfig::default(), false));
    }
    let config = AppConfig::load(path)
        .await
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok((config, true))
}

/// Load configuration, then start logging according to it.
pub async fn bootstrap(args: &CommonArgs, binary: &str) -> Result<AppConfig> {
    let (config, found) = load_config(&args.config).await?;
    init_tracing(args.verbose, &config);
    if !found {
        info!(path = %args.config.display(), "config file not found, using defaults");
    }
    info!(version = %msgpass_core::build_info::version_string(), "{binary} starting");
    Ok(config)
}
