//! mobchat node - a peer in the mobchat overlay network.
//!
//! This is the main entry point for the mobchat-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// mobchat overlay node.
#[derive(Parser, Debug)]
#[command(name = "mobchat-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mobchat-node.toml")]
    config: PathBuf,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print version and exit
    #[arg(long)]
    version_info: bool,

    /// Configuration overrides as key=value (port, address, checkin,
    /// public, maxincoming, maxoutgoing, keyfile)
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version_info {
        print_version();
        return Ok(());
    }

    // RUST_LOG takes precedence over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&args.log_level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting mobchat node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args.overrides)?;
    info!(
        port = config.port,
        public = config.public,
        checkin = %config.checkin,
        "Configuration loaded"
    );

    let node = Node::new(config).await?;
    let handle = node.handle();
    let mut task = tokio::spawn(node.run());

    tokio::select! {
        result = &mut task => {
            match result {
                Ok(Err(e)) => tracing::error!("Node error: {}", e),
                Err(e) => tracing::error!("Node task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            handle.shutdown().await;
            if let Err(e) = task.await {
                tracing::error!("Node task failed: {}", e);
            }
        }
    }

    info!("mobchat node stopped");
    Ok(())
}

/// Filter directive for a `--log-level` value; unknown values mean info.
fn level_directive(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn print_version() {
    println!("mobchat node");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Protocol: {}", mobchat_network::PROTOCOL_VERSION);
    println!();
    println!("Built with:");
    println!("  RSA-1024 identities, AES-256-GCM payloads");
    println!("  Tokio for async runtime");
}
