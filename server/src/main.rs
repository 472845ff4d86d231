use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerError};
use shared::{MotorKind, SimulationConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// JSON file with simulation and flow-control settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Authoritative consumption frequency in Hz, overrides the config file
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Physics sub-step frequency in Hz, overrides the config file
    #[arg(short, long)]
    update_rate: Option<u32>,

    /// Drop the oldest inputs once a connection has this many queued
    #[arg(long)]
    buffer_cap: Option<usize>,

    /// Character type to simulate (kinematic or planar)
    #[arg(short, long, default_value = "kinematic")]
    motor: MotorKind,

    /// Maximum number of concurrent clients
    #[arg(long, default_value = "32")]
    max_clients: usize,
}

fn load_config(args: &Args) -> Result<SimulationConfig, shared::ConfigError> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };

    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if let Some(update_rate) = args.update_rate {
        config.update_rate = update_rate;
    }
    if args.buffer_cap.is_some() {
        config.input_buffer_cap = args.buffer_cap;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = load_config(&args)?;

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config, args.motor.build(), args.max_clients).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
