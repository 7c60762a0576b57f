#![deny(unsafe_code)]

//! msgpass server: register a channel and answer requests until told to stop.

use anyhow::{Context, Result, bail};
use clap::Parser;
use msgpass_cli::CommonArgs;
use msgpass_core::dispatcher::Interrupt;
use msgpass_core::{Dispatcher, ServeOutcome, UnixTransport};
use tracing::{info, warn};

/// Answer every message with "ack"; stop on "shutdown".
#[derive(Parser)]
#[command(name = "msgpass-server", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = msgpass_cli::bootstrap(&cli.common, "msgpass-server").await?;

    let transport = UnixTransport::from_config(&config.transport);
    let name = config.service.name.as_str();
    let mut dispatcher = Dispatcher::startup(transport, name)
        .await
        .context("server startup failed")?;

    let address = dispatcher.address();
    println!(
        "channel {} ready (pid {}), registered as {name:?}",
        address.chid, address.pid
    );

    let interrupt = dispatcher.interrupt_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C");
                let _ = interrupt.send(Interrupt);
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });

    match dispatcher.run().await {
        ServeOutcome::ShutdownRequested => info!("stopped by shutdown command"),
        ServeOutcome::Interrupted => info!("stopped by interrupt"),
        ServeOutcome::ReceiveFailed(e) => {
            bail!(msgpass_core::Error::Transport(e))
        }
    }
    Ok(())
}
