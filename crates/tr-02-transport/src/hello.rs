//! HELLO exchange and the compatibility gate.
//!
//! The first frame on every fresh link, in both directions, is `hello`.
//! It announces the durable node id, the protocol version, an optional
//! build id, and the peer's metadata. The gate is fast-fail: an
//! incompatible peer is cut off before any routing state is touched.

use crate::errors::TransportError;
use shared_types::version::{build_ids_compatible, ProtocolVersion, BUILD_ID_FALLBACK};
use shared_types::{Frame, NodeId, PeerMetadata};

/// What the local side announces.
#[derive(Debug, Clone)]
pub struct LocalHello {
    pub node_id: NodeId,
    pub protocol_version: String,
    pub build_id: String,
    pub metadata: PeerMetadata,
}

impl LocalHello {
    pub fn to_frame(&self) -> Frame {
        Frame::Hello {
            node_id: self.node_id,
            protocol_version: self.protocol_version.clone(),
            build_id: if self.build_id == BUILD_ID_FALLBACK {
                None
            } else {
                Some(self.build_id.clone())
            },
            metadata: self.metadata.clone(),
        }
    }
}

/// What the remote side announced, post-gate.
#[derive(Debug, Clone)]
pub struct RemoteHello {
    pub node_id: NodeId,
    pub metadata: PeerMetadata,
}

/// Gate a received HELLO frame against the local announcement.
///
/// Protocol major.minor must match; build ids fail closed only when
/// both sides report genuine (non-fallback) values.
pub fn gate_hello(local: &LocalHello, frame: Frame) -> Result<RemoteHello, TransportError> {
    let (node_id, protocol_version, build_id, metadata) = match frame {
        Frame::Hello {
            node_id,
            protocol_version,
            build_id,
            metadata,
        } => (node_id, protocol_version, build_id, metadata),
        // The peer gated us out and said why before closing.
        Frame::VersionMismatch {
            client_version,
            server_version,
            ..
        } => {
            return Err(TransportError::VersionIncompatible {
                local: client_version,
                remote: server_version,
            });
        }
        _ => {
            return Err(TransportError::HandshakeFailed(
                "first frame was not hello".into(),
            ));
        }
    };

    let local_version = ProtocolVersion::parse(&local.protocol_version)
        .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
    let remote_version = ProtocolVersion::parse(&protocol_version).map_err(|_| {
        TransportError::VersionIncompatible {
            local: local.protocol_version.clone(),
            remote: protocol_version.clone(),
        }
    })?;
    if !local_version.is_compatible_with(&remote_version) {
        return Err(TransportError::VersionIncompatible {
            local: local.protocol_version.clone(),
            remote: protocol_version,
        });
    }

    let remote_build = build_id.unwrap_or_else(|| BUILD_ID_FALLBACK.to_string());
    if !build_ids_compatible(&local.build_id, &remote_build) {
        return Err(TransportError::VersionIncompatible {
            local: format!("{} (build {})", local.protocol_version, local.build_id),
            remote: format!("{protocol_version} (build {remote_build})"),
        });
    }

    Ok(RemoteHello { node_id, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LocalHello {
        LocalHello {
            node_id: NodeId::from_bytes([1u8; 20]),
            protocol_version: "1.2.0".into(),
            build_id: "abc123".into(),
            metadata: PeerMetadata::server("203.0.113.1:9470"),
        }
    }

    fn remote_frame(version: &str, build: Option<&str>) -> Frame {
        Frame::Hello {
            node_id: NodeId::from_bytes([2u8; 20]),
            protocol_version: version.into(),
            build_id: build.map(String::from),
            metadata: PeerMetadata::client(),
        }
    }

    #[test]
    fn matching_versions_pass() {
        let hello = gate_hello(&local(), remote_frame("1.2.7", Some("abc123"))).unwrap();
        assert_eq!(hello.node_id, NodeId::from_bytes([2u8; 20]));
    }

    #[test]
    fn minor_mismatch_is_fatal() {
        assert!(matches!(
            gate_hello(&local(), remote_frame("1.3.0", Some("abc123"))),
            Err(TransportError::VersionIncompatible { .. })
        ));
    }

    #[test]
    fn genuine_build_mismatch_fails_closed() {
        assert!(matches!(
            gate_hello(&local(), remote_frame("1.2.0", Some("zzz999"))),
            Err(TransportError::VersionIncompatible { .. })
        ));
    }

    #[test]
    fn fallback_build_passes_the_gate() {
        assert!(gate_hello(&local(), remote_frame("1.2.0", None)).is_ok());
    }

    #[test]
    fn non_hello_first_frame_is_rejected() {
        let frame = Frame::Ping {
            request_id: "r".into(),
        };
        assert!(matches!(
            gate_hello(&local(), frame),
            Err(TransportError::HandshakeFailed(_))
        ));
    }
}
