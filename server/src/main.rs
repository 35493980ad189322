use clap::Parser;
use log::info;
use server::relay::{RelayConfig, RelayServer, DEFAULT_MAX_CLIENTS};
use shared::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about = "WebSocket relay for position updates")]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of simultaneous connections
    #[arg(short, long, default_value_t = DEFAULT_MAX_CLIENTS)]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info to see connection logs");
    }

    let args = Args::parse();
    let config = RelayConfig {
        host: args.host,
        port: args.port,
        max_clients: args.max_clients,
    };

    let relay = RelayServer::bind(config).await?;

    tokio::select! {
        _ = relay.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
