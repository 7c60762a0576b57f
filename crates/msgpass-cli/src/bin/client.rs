#![deny(unsafe_code)]

//! msgpass client: send lines from stdin to the server and print replies.

use anyhow::{Context, Result};
use clap::Parser;
use msgpass_cli::CommonArgs;
use msgpass_core::{Address, ConnectMode, Connector, SessionEnd, UnixTransport};
use tokio::io::BufReader;
use tracing::info;

/// Talk to a msgpass server by service name, or by PID and CHID.
#[derive(Parser)]
#[command(name = "msgpass-client", version, about, long_about = None)]
struct Cli {
    /// Server process id (address mode).
    #[arg(requires = "chid")]
    pid: Option<u32>,

    /// Server channel id (address mode).
    #[arg(requires = "pid")]
    chid: Option<u32>,

    #[command(flatten)]
    common: CommonArgs,
}

impl Cli {
    fn mode(&self, service_name: &str) -> ConnectMode {
        match (self.pid, self.chid) {
            (Some(pid), Some(chid)) => ConnectMode::ByAddress(Address::new(pid, chid)),
            _ => ConnectMode::ByName(service_name.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = msgpass_cli::bootstrap(&cli.common, "msgpass-client").await?;

    let mode = cli.mode(&config.service.name);
    let transport = UnixTransport::from_config(&config.transport);
    let mut connector = Connector::connect(transport, mode)
        .await
        .context("could not reach the server")?
        .with_exchange_timeout(config.connector.exchange_timeout());
    println!("connected via {}", connector.mode());

    let end = connector
        .run_session(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            &config.connector.prompt,
        )
        .await
        .context("session ended abnormally")?;

    match end {
        SessionEnd::Terminated => info!("server terminated the session"),
        SessionEnd::InputClosed => info!("input closed"),
    }
    Ok(())
}
