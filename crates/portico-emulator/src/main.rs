use clap::Parser;
use portico_emulator::Store;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "portico-emulator", version, about = "In-memory API Gateway emulator for local Portico stacks")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 4566)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Mirror REST APIs to this JSON file so they survive restarts.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let addr = format!("{}:{}", cli.host, cli.port);
    info!("starting portico-emulator on {addr}");
    let store = match cli.state_file {
        Some(path) => {
            info!("state file: {}", path.display());
            Store::persistent(path)
        }
        None => Store::in_memory(),
    };

    match portico_emulator::run_server(&Arc::new(store), &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed to serve on {addr}: {e}");
            ExitCode::FAILURE
        }
    }
}
