use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use hazeld::config::Config;
use hazeld::transport::{operator, Listener};

#[derive(Parser, Debug)]
#[command(name = "hazeld", version, about = "Lobby/relay server for Hazel-style UDP clients")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.socket.port = port;
    }

    let (listener, operator_tx) = match Listener::bind(config).await {
        Ok(bound) => bound,
        Err(err) => {
            error!(%err, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    operator::spawn_stdin_reader(operator_tx);

    if let Err(err) = listener.run().await {
        error!(%err, "server loop failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
