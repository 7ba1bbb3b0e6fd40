//! # Trellis Node
//!
//! The overlay participant binary: loads or generates an identity,
//! joins the network through the bootstrap coordinator, and runs the
//! DHT and pub/sub layers until interrupted.

use anyhow::Result;
use node_runtime::{start_node, NodeConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    trellis_telemetry::init_logging();

    let mut config = NodeConfig::default();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = config.apply_args(&args) {
        error!("{e}");
        eprintln!("usage: trellis-node [--config <path>] [--bootstrap <addr>] [--listen <addr>] [--datagram <addr>] [--node-type server|client|bridge] [--bridge] [--bridge-secret <secret>] [--data-dir <dir>] [--build-id <id>]");
        std::process::exit(2);
    }

    let context = match start_node(config).await {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Node failed to start");
            std::process::exit(1);
        }
    };

    info!(node = %context.node_id, "Trellis node up; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    context.shutdown().await;
    Ok(())
}
