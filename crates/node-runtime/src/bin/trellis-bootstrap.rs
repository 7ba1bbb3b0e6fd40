//! # Trellis Bootstrap Coordinator
//!
//! The coordinator process: participant registry, genesis election,
//! bridge-mediated onboarding, signalling relay, and the HTTP health
//! surface. Exits 0 on a clean shutdown and non-zero when the listen
//! address cannot be bound.

use anyhow::Result;
use tr_03_identity::NodeIdentity;
use tr_04_bootstrap::{BootstrapServer, ServerConfig};
use tracing::{error, info};

fn parse_args(args: &[String]) -> Result<ServerConfig, String> {
    let mut config = ServerConfig {
        http_addr: Some("0.0.0.0:9480".into()),
        ..ServerConfig::default()
    };
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut take = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("flag {flag} needs a value"))
        };
        match flag.as_str() {
            "--listen" => config.listen_addr = take()?,
            "--http" => config.http_addr = Some(take()?),
            "--no-http" => config.http_addr = None,
            "--create-dht" => config.create_dht = true,
            "--bridge-secret" => config.bridge_secret = Some(take()?),
            "--build-id" => config.build_id = take()?,
            other => return Err(format!("unknown flag {other}")),
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    trellis_telemetry::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("usage: trellis-bootstrap [--listen <addr>] [--http <addr>|--no-http] [--create-dht] [--bridge-secret <secret>] [--build-id <id>]");
            std::process::exit(2);
        }
    };

    // The coordinator's own identity signs genesis and server-minted
    // membership tokens; fresh per process, trusted on first use.
    let identity = NodeIdentity::generate();
    let server = BootstrapServer::new(identity, config);

    let bound = match server.run().await {
        Ok(bound) => bound,
        Err(e) => {
            error!(error = %e, "Could not bind the bootstrap listener");
            std::process::exit(1);
        }
    };

    info!(%bound, issuer = %server.issuer_id(), "Coordinator up; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    server.shutdown();
    Ok(())
}
