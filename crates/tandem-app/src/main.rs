//! tandem binary
//!
//! ## Usage
//!
//! ```bash
//! # Local session, no network
//! tandem --offline
//!
//! # Connect to a server, long-poll only
//! tandem --url ws://127.0.0.1:8080/messaging --transport long-poll
//!
//! # Feed envelopes on stdin, one JSON object per line
//! echo '{"type":"DATA_REQUEST","payload":{"service":"system","name":"ping","params":[]}}' | tandem --offline
//! ```
//!
//! State goes to stdout, logs to stderr (`RUST_LOG` to filter).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tandem_app::{AppConfig, Host};
use tandem_client::{NetworkConnector, TransportKind};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Drive a tandem worker from stdin and mirror its state to stdout.
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Worker/mirror state host with a reconnecting transport bridge")]
struct Args {
    /// RON config file (default: ~/.config/tandem/config.ron if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server endpoint, overrides the config file
    #[arg(long)]
    url: Option<String>,

    /// Primary transport: websocket or long-poll
    #[arg(long)]
    transport: Option<String>,

    /// Do not start the transport bridge
    #[arg(long)]
    offline: bool,

    /// Do not print state changes
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(url) = &self.url {
            config.bridge.url = url.clone();
        }
        if let Some(transport) = &self.transport {
            config.bridge.transport = TransportKind::from_str(transport)
                .ok_or_else(|| anyhow!("unknown transport `{}`", transport))?;
        }
        if self.offline {
            config.connect = false;
        }
        if self.quiet {
            config.print_state = false;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref()).context("loading config")?;
    args.apply(&mut config)?;

    let mut host = Host::start(&config, Arc::new(NetworkConnector));
    let result = host
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;
    host.shutdown().await;

    result.context("host stopped")
}
