use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use redbridge_core::{load_config, SubmissionPipeline};
use redbridge_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "redbridge-server", about = "Portal listing-submission service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "configs/redbridge.toml")]
    config: PathBuf,
    /// Override the bind address from the configuration.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let addr: SocketAddr = match cli.bind {
        Some(addr) => addr,
        None => config.server.bind_addr.parse()?,
    };
    let production = config.server.is_production();

    let pipeline = SubmissionPipeline::new(Arc::new(config));
    let state = Arc::new(AppState {
        submitter: Arc::new(pipeline),
        production,
    });

    info!(config = %cli.config.display(), production, "starting redbridge server");
    serve(addr, state).await?;
    Ok(())
}
