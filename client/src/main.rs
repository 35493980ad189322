use clap::Parser;
use client::config::{ClientConfig, ReconnectPolicy};
use client::input::Command;
use client::network::Client;
use log::info;
use shared::{Position, DEFAULT_HOST, DEFAULT_PORT, SPAWN_X, SPAWN_Y};
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host to connect to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Relay port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Initial x coordinate of the local entity
    #[arg(long, default_value_t = SPAWN_X)]
    spawn_x: f32,

    /// Initial y coordinate of the local entity
    #[arg(long, default_value_t = SPAWN_Y)]
    spawn_y: f32,

    /// Minimum milliseconds between transmitted drag samples (0 sends all)
    #[arg(long, default_value = "0")]
    throttle_ms: u64,

    /// Give up on the first connection error
    #[arg(long)]
    no_reconnect: bool,

    /// Stop after this many consecutive failed reconnects
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        let min_move_interval = match self.throttle_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let reconnect = if self.no_reconnect {
            ReconnectPolicy::disabled()
        } else {
            ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
                ..ReconnectPolicy::default()
            }
        };

        ClientConfig {
            host: self.host,
            port: self.port,
            spawn: Position::new(self.spawn_x, self.spawn_y),
            min_move_interval,
            reconnect,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();

    info!("Starting client...");
    info!("Connecting to: {}", config.endpoint());
    info!("Commands: begin | move X Y | end | drag X Y | show | id | quit");

    let (commands, rx) = mpsc::unbounded_channel();

    // Terminal input blocks, so it gets its own thread rather than a runtime task
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{}", e),
            }
        }
    });

    let mut client = Client::new(config);
    println!("{}", client.id());

    client.run(rx).await?;

    Ok(())
}
