use clap::Parser;
use client::input::InputPattern;
use client::network::{Client, ClientError, ClientOptions};
use log::{info, warn};
use shared::{MotorKind, SimulationConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Require this character type (kinematic or planar); defaults to the server's
    #[arg(short, long)]
    motor: Option<MotorKind>,

    /// JSON file with flow-control settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input generator (patrol, random or idle)
    #[arg(short, long, default_value = "patrol")]
    input: InputPattern,

    /// Seed for the random input generator
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Stop after this many local ticks
    #[arg(short, long)]
    ticks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let flow = match &args.config {
        Some(path) => SimulationConfig::load(path)?.flow,
        None => SimulationConfig::default().flow,
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    info!("Driving the character with {} input", args.input);

    let options = ClientOptions {
        motor: args.motor,
        flow,
        fake_ping_ms: args.fake_ping,
        max_ticks: args.ticks,
    };
    let mut client = Client::connect(&args.server, args.input.build(args.seed), options).await?;

    tokio::select! {
        result = client.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    let stats = client.drain(Duration::from_millis(500)).await;
    info!(
        "Session ended: {} inputs sent, {} results, {} corrections, {} cadence changes",
        stats.inputs_sent, stats.results_received, stats.corrections, stats.cadence_changes
    );
    if stats.unconfirmed > 0 {
        warn!("{} inputs were never acknowledged", stats.unconfirmed);
    }

    client.disconnect().await;
    Ok(())
}
