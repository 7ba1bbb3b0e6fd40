//! Datagram channel signalling choreography.
//!
//! The overlay treats signalling payloads as opaque and only promises
//! to deliver them unchanged (over the bootstrap link, or a DHT link
//! once one exists). The runtime is the endpoint that actually reads
//! them: an offer names the sender's datagram address, the answer names
//! ours, and both sides dial. Collision resolution in the transport
//! collapses the simultaneous dials into one link.

use serde::{Deserialize, Serialize};
use shared_types::NodeId;
use std::net::SocketAddr;
use tr_02_transport::ConnectionManager;
use tr_04_bootstrap::BootstrapClient;
use tracing::{debug, warn};

/// Signalling payload for the datagram transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    /// "Dial me": carries the offerer's datagram address.
    Offer { udp_addr: String },
    /// The answerer's datagram address.
    Answer { udp_addr: String },
}

/// Send a channel offer to `to`, relayed through the coordinator.
pub async fn send_offer(
    bootstrap: &BootstrapClient,
    transport: &ConnectionManager,
    to: NodeId,
) -> anyhow::Result<()> {
    let Some(udp_addr) = transport.datagram_addr() else {
        anyhow::bail!("datagram transport not enabled");
    };
    let payload = serde_json::to_value(SignalPayload::Offer {
        udp_addr: udp_addr.to_string(),
    })?;
    bootstrap.send_signal(to, payload).await?;
    Ok(())
}

/// Handle a relayed signalling payload.
pub async fn handle_signal(
    bootstrap: &BootstrapClient,
    transport: &ConnectionManager,
    from: NodeId,
    payload: serde_json::Value,
) {
    let parsed: SignalPayload = match serde_json::from_value(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(from = %from, error = %e, "Undecodable signalling payload ignored");
            return;
        }
    };

    match parsed {
        SignalPayload::Offer { udp_addr } => {
            let Ok(addr) = udp_addr.parse::<SocketAddr>() else {
                debug!(from = %from, "Offer with unparseable address");
                return;
            };
            // Answer with our address, then dial theirs.
            if let Some(ours) = transport.datagram_addr() {
                let answer = SignalPayload::Answer {
                    udp_addr: ours.to_string(),
                };
                if let Ok(value) = serde_json::to_value(answer) {
                    let _ = bootstrap.send_signal(from, value).await;
                }
            }
            dial(transport, from, addr).await;
        }
        SignalPayload::Answer { udp_addr } => {
            let Ok(addr) = udp_addr.parse::<SocketAddr>() else {
                debug!(from = %from, "Answer with unparseable address");
                return;
            };
            dial(transport, from, addr).await;
        }
    }
}

async fn dial(transport: &ConnectionManager, expected: NodeId, addr: SocketAddr) {
    match transport.connect_datagram(addr).await {
        Ok(peer) if peer == expected => {
            debug!(peer = %peer, "Datagram channel established");
        }
        Ok(peer) => {
            warn!(expected = %expected, got = %peer, "Datagram channel reached the wrong peer");
            transport.disconnect(&peer);
        }
        Err(e) => {
            debug!(peer = %expected, error = %e, "Datagram dial failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_as_tagged_json() {
        let offer = SignalPayload::Offer {
            udp_addr: "203.0.113.9:4600".into(),
        };
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["kind"], "offer");
        let back: SignalPayload = serde_json::from_value(value).unwrap();
        assert!(matches!(back, SignalPayload::Offer { .. }));
    }
}
