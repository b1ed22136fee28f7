//! earshot: proximity-voice relay for game servers.
//!
//! A game-server plugin POSTs bulk player positions; voice clients connect
//! over WebSocket, receive per-tick nearby lists with distance-derived
//! volumes, and negotiate direct WebRTC media sessions through the relay.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use earshot_server::ServerConfig;

#[derive(Parser)]
#[command(name = "earshot", about = "Proximity-voice relay for game servers")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 25566)]
    port: u16,

    /// Broadcast interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Directory the web client bundle is served from.
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        port: args.port,
        broadcast_interval: Duration::from_millis(args.interval_ms.max(1)),
        public_dir: Some(args.public_dir),
        ..Default::default()
    };

    let handle = earshot_server::start(config)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = handle.port, "earshot ready");
    tracing::info!("  POST /positions - game-server plugin reports positions");
    tracing::info!("  GET  /ws        - voice clients");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
