//! confpush - push a watched JSON file to WebSocket clients.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use confpush_server::{Service, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Push a JSON file to WebSocket clients whenever it changes
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CONFPUSH_CONFIG")]
    config: Option<PathBuf>,

    /// JSON file to watch (overrides `watch_path`)
    #[arg(short, long)]
    watch: Option<PathBuf>,

    /// Listen host (overrides `host`)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides `port`)
    #[arg(short, long)]
    port: Option<u16>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(watch) = self.watch {
            config.watch_path = watch;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    confpush_telemetry::init_logging()?;

    info!("Starting confpush v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };
    args.apply(&mut config);
    info!(
        watch_path = %config.watch_path.display(),
        listen = %config.listen_addr(),
        max_clients = config.max_clients,
        "Configuration loaded"
    );

    let service = Service::new(config)?.bind().await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received Ctrl+C");
        signal.cancel();
    });

    service.run(shutdown).await?;

    Ok(())
}
